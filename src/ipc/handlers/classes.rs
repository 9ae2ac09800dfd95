use crate::bulk_import::ClassKey;
use crate::ipc::error::{get_required_str, respond, HandlerErr};
use crate::ipc::handlers::sessions::active_session_id;
use crate::ipc::types::{AppState, Request};
use crate::messages::{friendly_message, MessageContext};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub section: String,
}

/// Classes of the active session; empty when no session is active.
pub fn active_classes(conn: &Connection) -> Result<Vec<ClassRow>, HandlerErr> {
    let Some(session_id) = active_session_id(conn)? else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(
        "SELECT id, name, section FROM classes WHERE session_id = ? ORDER BY name, section",
    )?;
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                section: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn roster_keys(conn: &Connection) -> Result<Vec<ClassKey>, HandlerErr> {
    Ok(active_classes(conn)?
        .iter()
        .map(|c| ClassKey::new(&c.name, &c.section))
        .collect())
}

fn with_friendly(e: HandlerErr) -> HandlerErr {
    let friendly = friendly_message(MessageContext::Class, &e.message);
    e.with_details(json!({ "friendlyMessage": friendly }))
}

fn create_class(conn: &Connection, name: &str, section: &str) -> Result<String, HandlerErr> {
    let name = name.trim();
    let section = section.trim();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    if section.is_empty() {
        return Err(HandlerErr::new("bad_params", "section must not be empty"));
    }
    let Some(session_id) = active_session_id(conn)? else {
        return Err(HandlerErr::new("no_active_session", "No active session"));
    };

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes
             WHERE session_id = ? AND name = ? COLLATE NOCASE AND section = ? COLLATE NOCASE",
            (&session_id, name, section),
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            format!("Class {name}-{section} already exists"),
        ));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, session_id, name, section, created_at) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &session_id, name, section, Utc::now().to_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "classes" }))
    })?;
    tracing::info!(class = %class_id, name, section, "class created");
    Ok(class_id)
}

fn classes_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "classes": [] }));
    };

    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.section,
           c.session_id,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name, c.section",
    )?;
    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let section: String = row.get(2)?;
            let session_id: String = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "section": section,
                "sessionId": session_id,
                "studentCount": student_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let name = get_required_str(params, "name")?;
    let section = get_required_str(params, "section")?;
    let class_id = create_class(conn, &name, &section).map_err(with_friendly)?;
    Ok(json!({ "classId": class_id, "name": name, "section": section }))
}

/// Every item is attempted independently; earlier successes are kept when a
/// later item fails.
fn classes_bulk_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let Some(items) = params.get("items").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing items"));
    };
    if items.is_empty() {
        return Err(HandlerErr::new("bad_params", "items must not be empty"));
    }

    let mut created = 0usize;
    let mut failed = 0usize;
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let section = item.get("section").and_then(|v| v.as_str()).unwrap_or("");
        match create_class(conn, name, section) {
            Ok(class_id) => {
                created += 1;
                results.push(json!({
                    "index": index,
                    "name": name.trim(),
                    "section": section.trim(),
                    "ok": true,
                    "classId": class_id,
                }));
            }
            Err(e) => {
                failed += 1;
                results.push(json!({
                    "index": index,
                    "name": name.trim(),
                    "section": section.trim(),
                    "ok": false,
                    "code": e.code,
                    "message": e.message,
                    "friendlyMessage": friendly_message(MessageContext::Class, &e.message),
                }));
            }
        }
    }

    tracing::info!(created, failed, "bulk class creation settled");
    Ok(json!({
        "created": created,
        "failed": failed,
        "results": results,
    }))
}

fn classes_roster(state: &mut AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "classes": [] }));
    };
    let classes = active_classes(conn)?
        .into_iter()
        .map(|c| json!({ "id": c.id, "name": c.name, "section": c.section }))
        .collect::<Vec<_>>();
    Ok(json!({ "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state),
        "classes.create" => classes_create(state, &req.params),
        "classes.bulkCreate" => classes_bulk_create(state, &req.params),
        "classes.roster" => classes_roster(state),
        _ => return None,
    };
    let invalidates: &[&str] = match req.method.as_str() {
        "classes.create" | "classes.bulkCreate" => &["classes", "sessions"],
        _ => &[],
    };
    Some(respond(&req.id, result, invalidates))
}
