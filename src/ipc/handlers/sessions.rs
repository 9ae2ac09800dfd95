use crate::ipc::error::{get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::messages::{friendly_message, MessageContext};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
struct SessionRow {
    id: String,
    name: String,
    start_date: String,
    end_date: String,
    is_active: bool,
    class_count: i64,
}

impl SessionRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "startDate": self.start_date,
            "endDate": self.end_date,
            "isActive": self.is_active,
            "classCount": self.class_count,
        })
    }
}

fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FMT)
        .map_err(|_| HandlerErr::new("bad_params", format!("{key} must be a YYYY-MM-DD date")))
}

fn check_range(start: &str, end: &str) -> Result<(), HandlerErr> {
    let s = parse_date("startDate", start)?;
    let e = parse_date("endDate", end)?;
    if s >= e {
        return Err(HandlerErr::new(
            "bad_params",
            "startDate must be before endDate",
        ));
    }
    Ok(())
}

fn load_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    conn.query_row(
        "SELECT s.id, s.name, s.start_date, s.end_date, s.is_active,
                (SELECT COUNT(*) FROM classes c WHERE c.session_id = s.id)
         FROM academic_sessions s
         WHERE s.id = ?",
        [session_id],
        |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                end_date: r.get(3)?,
                is_active: r.get(4)?,
                class_count: r.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "session not found"))
}

fn name_taken(conn: &Connection, name: &str, except_id: Option<&str>) -> Result<bool, HandlerErr> {
    let hit: Option<String> = conn
        .query_row(
            "SELECT id FROM academic_sessions WHERE name = ? COLLATE NOCASE",
            [name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match (hit, except_id) {
        (Some(id), Some(except)) => id != except,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn name_conflict(name: &str) -> HandlerErr {
    let message = format!("Session {name} already exists");
    let friendly = friendly_message(MessageContext::Session, &message);
    HandlerErr::new("conflict", message).with_details(json!({ "friendlyMessage": friendly }))
}

pub fn active_session_id(conn: &Connection) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT id FROM academic_sessions WHERE is_active = 1 LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?)
}

fn sessions_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "sessions": [] }));
    };
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.start_date, s.end_date, s.is_active,
                (SELECT COUNT(*) FROM classes c WHERE c.session_id = s.id)
         FROM academic_sessions s
         ORDER BY s.start_date DESC, s.name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                end_date: r.get(3)?,
                is_active: r.get(4)?,
                class_count: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": rows.iter().map(SessionRow::to_json).collect::<Vec<_>>() }))
}

fn sessions_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let name = get_required_str(params, "name")?;
    let start_date = get_required_str(params, "startDate")?;
    let end_date = get_required_str(params, "endDate")?;
    let is_active = params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    check_range(&start_date, &end_date)?;
    if name_taken(conn, &name, None)? {
        return Err(name_conflict(&name));
    }

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    if is_active {
        tx.execute("UPDATE academic_sessions SET is_active = 0", [])?;
    }
    tx.execute(
        "INSERT INTO academic_sessions(id, name, start_date, end_date, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &name, &start_date, &end_date, is_active, Utc::now().to_rfc3339()),
    )?;
    tx.commit()?;
    tracing::info!(session = %id, name = %name, is_active, "session created");
    Ok(json!({ "sessionId": id, "name": name, "isActive": is_active }))
}

fn sessions_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let session_id = get_required_str(params, "sessionId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing patch"));
    };
    let mut row = load_session(conn, &session_id)?;

    if let Some(v) = patch.get("name") {
        let name = v
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::new("bad_params", "name must not be empty"))?;
        if name_taken(conn, name, Some(&session_id))? {
            return Err(name_conflict(name));
        }
        row.name = name.to_string();
    }
    if let Some(v) = patch.get("startDate").and_then(|v| v.as_str()) {
        row.start_date = v.trim().to_string();
    }
    if let Some(v) = patch.get("endDate").and_then(|v| v.as_str()) {
        row.end_date = v.trim().to_string();
    }
    check_range(&row.start_date, &row.end_date)?;
    let activate = patch.get("isActive").and_then(|v| v.as_bool());

    let tx = conn.unchecked_transaction()?;
    if activate == Some(true) {
        tx.execute("UPDATE academic_sessions SET is_active = 0 WHERE id <> ?", [&session_id])?;
    }
    if let Some(a) = activate {
        row.is_active = a;
    }
    tx.execute(
        "UPDATE academic_sessions SET name = ?, start_date = ?, end_date = ?, is_active = ? WHERE id = ?",
        (&row.name, &row.start_date, &row.end_date, row.is_active, &session_id),
    )?;
    tx.commit()?;
    tracing::info!(session = %session_id, "session updated");
    Ok(row.to_json())
}

fn delete_status(conn: &Connection, session_id: &str) -> Result<(bool, Option<String>, SessionRow), HandlerErr> {
    let row = load_session(conn, session_id)?;
    let reason = if row.is_active {
        Some("The active session cannot be deleted. Activate another session first.".to_string())
    } else if row.class_count > 0 {
        Some(format!(
            "Session has {} class(es). Delete or move them first.",
            row.class_count
        ))
    } else {
        None
    };
    Ok((reason.is_none(), reason, row))
}

fn sessions_delete_status(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let session_id = get_required_str(params, "sessionId")?;
    let (can_delete, reason, row) = delete_status(conn, &session_id)?;
    Ok(json!({
        "canDelete": can_delete,
        "reason": reason,
        "classCount": row.class_count,
        "isActive": row.is_active,
    }))
}

fn sessions_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let session_id = get_required_str(params, "sessionId")?;
    let (can_delete, reason, _) = delete_status(conn, &session_id)?;
    if !can_delete {
        return Err(HandlerErr::new(
            "conflict",
            reason.unwrap_or_else(|| "session cannot be deleted".to_string()),
        ));
    }
    conn.execute("DELETE FROM academic_sessions WHERE id = ?", [&session_id])?;
    tracing::info!(session = %session_id, "session deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "sessions.list" => sessions_list(state),
        "sessions.create" => sessions_create(state, &req.params),
        "sessions.update" => sessions_update(state, &req.params),
        "sessions.deleteStatus" => sessions_delete_status(state, &req.params),
        "sessions.delete" => sessions_delete(state, &req.params),
        _ => return None,
    };
    let invalidates: &[&str] = match req.method.as_str() {
        "sessions.create" | "sessions.delete" => &["sessions"],
        "sessions.update" => &["sessions", "classes"],
        _ => &[],
    };
    Some(respond(&req.id, result, invalidates))
}
