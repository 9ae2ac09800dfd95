use crate::bulk_import::{parse_upload, sample_csv, validate_csv_file, BulkStudentRow, ClassKey, UploadMode};
use crate::ipc::error::{get_optional_str, get_required_str, respond, HandlerErr};
use crate::ipc::handlers::classes::{active_classes, roster_keys, ClassRow};
use crate::ipc::types::{AppState, Request};
use crate::messages::{friendly_message, MessageContext};
use crate::samples;
use crate::students::{password_digest, validate_student_form, StudentDraft};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

fn upload_mode(params: &Value) -> Result<UploadMode, HandlerErr> {
    let raw = get_required_str(params, "mode")?;
    UploadMode::parse(&raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("mode must be classWise or schoolWide, got {raw}"),
        )
    })
}

/// Upload content comes inline as `text` or from a file at `path`.
fn upload_text(params: &Value) -> Result<String, HandlerErr> {
    let text = if let Some(t) = params.get("text").and_then(|v| v.as_str()) {
        t.to_string()
    } else if let Some(path) = get_optional_str(params, "path") {
        std::fs::read_to_string(&path).map_err(|e| {
            HandlerErr::new("io_failed", format!("failed to read {path}: {e}"))
        })?
    } else {
        return Err(HandlerErr::new("bad_params", "missing text or path"));
    };
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn load_class(conn: &Connection, class_id: &str) -> Result<ClassRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, section FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                section: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "class not found"))
}

fn students_list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = get_required_str(params, "classId")?;
    load_class(conn, &class_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, admission_no, roll_no, father_name, mother_name, parents_phone, email
         FROM students
         WHERE class_id = ?
         ORDER BY roll_no",
    )?;
    let students = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "admissionNo": r.get::<_, String>(2)?,
                "rollNo": r.get::<_, i64>(3)?,
                "fatherName": r.get::<_, String>(4)?,
                "motherName": r.get::<_, String>(5)?,
                "parentsPhone": r.get::<_, String>(6)?,
                "email": r.get::<_, Option<String>>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_validate_form(params: &Value) -> Result<Value, HandlerErr> {
    let source = params.get("student").unwrap_or(params);
    let draft: StudentDraft = serde_json::from_value(source.clone())
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    let errors = validate_student_form(&draft);
    Ok(json!({ "ok": errors.is_empty(), "errors": errors }))
}

fn students_validate_csv(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let mode = upload_mode(params)?;
    let text = upload_text(params)?;
    let roster = match (mode, state.db.as_ref()) {
        (UploadMode::SchoolWide, Some(conn)) => roster_keys(conn)?,
        _ => Vec::new(),
    };
    let result = validate_csv_file(&text, mode, &roster);
    tracing::debug!(ok = result.ok, errors = result.errors.len(), "csv validated");
    Ok(json!(result))
}

struct InvalidRow {
    row: usize,
    reason: String,
}

/// Store-side checks the file alone cannot answer.
fn recheck_rows(
    conn: &Connection,
    rows: &[BulkStudentRow],
    target: &dyn Fn(&BulkStudentRow) -> Option<ClassRow>,
) -> Result<(Vec<(ClassRow, usize)>, Vec<InvalidRow>), HandlerErr> {
    let mut placed = Vec::new();
    let mut invalid = Vec::new();
    let mut rolls_in_file = HashSet::<(String, u32)>::new();

    for (i, r) in rows.iter().enumerate() {
        let taken: Option<String> = conn
            .query_row(
                "SELECT admission_no FROM students WHERE admission_no = ? COLLATE NOCASE",
                [&r.admission_no],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            invalid.push(InvalidRow {
                row: r.row,
                reason: format!("admissionNo {} already exists", r.admission_no),
            });
            continue;
        }

        let Some(class) = target(r) else {
            invalid.push(InvalidRow {
                row: r.row,
                reason: "class not found".to_string(),
            });
            continue;
        };

        let roll_taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM students WHERE class_id = ? AND roll_no = ?",
                (&class.id, r.roll_no),
                |row| row.get(0),
            )
            .optional()?;
        if roll_taken.is_some() || !rolls_in_file.insert((class.id.clone(), r.roll_no)) {
            invalid.push(InvalidRow {
                row: r.row,
                reason: format!(
                    "rollNo {} is already taken in class {}-{}",
                    r.roll_no, class.name, class.section
                ),
            });
            continue;
        }
        placed.push((class, i));
    }
    Ok((placed, invalid))
}

fn students_bulk_upload(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mode = upload_mode(params)?;
    let text = upload_text(params)?;

    let fixed_class = match mode {
        UploadMode::ClassWise => {
            let class_id = get_required_str(params, "classId")?;
            Some(load_class(conn, &class_id)?)
        }
        UploadMode::SchoolWide => None,
    };
    let classes = active_classes(conn)?;
    let roster = classes
        .iter()
        .map(|c| ClassKey::new(&c.name, &c.section))
        .collect::<Vec<_>>();

    let rows = parse_upload(&text, mode, &roster).map_err(|errors| {
        HandlerErr::new(
            "validation_failed",
            errors.first().cloned().unwrap_or_default(),
        )
        .with_details(json!({ "errors": errors }))
    })?;

    let by_key = classes
        .iter()
        .map(|c| (ClassKey::new(&c.name, &c.section), c.clone()))
        .collect::<HashMap<_, _>>();
    let target = |r: &BulkStudentRow| -> Option<ClassRow> {
        match &fixed_class {
            Some(c) => Some(c.clone()),
            None => by_key
                .get(&ClassKey::new(
                    r.class_name.as_deref().unwrap_or(""),
                    r.section.as_deref().unwrap_or(""),
                ))
                .cloned(),
        }
    };

    let (placed, invalid) = recheck_rows(conn, &rows, &target)?;
    if !invalid.is_empty() {
        tracing::info!(rejected = invalid.len(), total = rows.len(), "bulk upload rejected");
        let invalid_rows = invalid
            .iter()
            .map(|r| {
                json!({
                    "row": r.row,
                    "reason": r.reason,
                    "friendlyMessage": format!(
                        "Row {}: {}",
                        r.row,
                        friendly_message(MessageContext::Student, &r.reason)
                    ),
                })
            })
            .collect::<Vec<_>>();
        return Err(HandlerErr::new(
            "bulk_rejected",
            format!("{} row(s) were rejected", invalid.len()),
        )
        .with_details(json!({ "invalidRows": invalid_rows })));
    }

    let now = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    for (class, i) in &placed {
        let r = &rows[*i];
        let salt = Uuid::new_v4().simple().to_string();
        tx.execute(
            "INSERT INTO students(id, class_id, name, admission_no, roll_no, father_name, mother_name,
                                  parents_phone, email, password_salt, password_hash, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &class.id,
                &r.name,
                &r.admission_no,
                r.roll_no,
                &r.father_name,
                &r.mother_name,
                &r.parents_phone,
                &r.email,
                &salt,
                password_digest(&salt, &r.password),
                &now,
            ),
        )?;
    }
    tx.commit()?;
    tracing::info!(inserted = placed.len(), ?mode, "bulk upload applied");
    Ok(json!({ "inserted": placed.len() }))
}

fn students_sample_csv(params: &Value) -> Result<Value, HandlerErr> {
    let mode = upload_mode(params)?;
    Ok(json!({
        "fileName": mode.sample_file_name(),
        "content": sample_csv(mode),
    }))
}

fn students_export_samples(params: &Value) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let summary = samples::export_sample_bundle(&out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:?}")))?;
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.validateForm" => students_validate_form(&req.params),
        "students.validateCsv" => students_validate_csv(state, &req.params),
        "students.bulkUpload" => students_bulk_upload(state, &req.params),
        "students.sampleCsv" => students_sample_csv(&req.params),
        "students.exportSamples" => students_export_samples(&req.params),
        _ => return None,
    };
    let invalidates: &[&str] = match req.method.as_str() {
        "students.bulkUpload" => &["students", "classes", "billableStudents"],
        _ => &[],
    };
    Some(respond(&req.id, result, invalidates))
}
