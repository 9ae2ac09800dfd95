use crate::csv::{content_lines, csv_quote, parse_csv_line};
use crate::students::{
    check_min_chars, check_optional_email, check_password, check_phone, check_required, parse_roll_no,
    FieldError, NAME_MIN_CHARS,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const STUDENT_HEADERS: [&str; 7] = [
    "name",
    "password",
    "admissionNo",
    "fatherName",
    "motherName",
    "parentsPhone",
    "rollNo",
];
const CLASS_HEADERS: [&str; 2] = ["className", "section"];
const EMAIL_HEADER: &str = "email";
const MAX_MISMATCH_EXAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadMode {
    ClassWise,
    SchoolWide,
}

impl UploadMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "classWise" | "class_wise" => Some(UploadMode::ClassWise),
            "schoolWide" | "school_wide" => Some(UploadMode::SchoolWide),
            _ => None,
        }
    }

    pub fn required_headers(self) -> Vec<&'static str> {
        let mut out = STUDENT_HEADERS.to_vec();
        if self == UploadMode::SchoolWide {
            out.extend(CLASS_HEADERS);
        }
        out
    }

    pub fn sample_file_name(self) -> &'static str {
        match self {
            UploadMode::ClassWise => "students_class_wise_sample.csv",
            UploadMode::SchoolWide => "students_school_wide_sample.csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn passed() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self { ok: false, errors }
    }
}

/// A `(class name, section)` pair, trimmed and lower-cased for matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassKey {
    pub name: String,
    pub section: String,
}

impl ClassKey {
    pub fn new(name: &str, section: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            section: section.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkStudentRow {
    /// 1-based "Row N" label shared with validation messages.
    pub row: usize,
    pub name: String,
    pub password: String,
    pub admission_no: String,
    pub father_name: String,
    pub mother_name: String,
    pub parents_phone: String,
    pub roll_no: u32,
    pub email: Option<String>,
    pub class_name: Option<String>,
    pub section: Option<String>,
}

pub fn validate_csv_file(text: &str, mode: UploadMode, roster: &[ClassKey]) -> ValidationResult {
    match parse_upload(text, mode, roster) {
        Ok(_) => ValidationResult::passed(),
        Err(errors) => ValidationResult::failed(errors),
    }
}

/// Validates an upload and returns its typed rows, or every collected message.
pub fn parse_upload(
    text: &str,
    mode: UploadMode,
    roster: &[ClassKey],
) -> Result<Vec<BulkStudentRow>, Vec<String>> {
    let lines = content_lines(text);
    if lines.is_empty() {
        return Err(vec!["CSV file is empty".to_string()]);
    }

    let headers = parse_csv_line(lines[0]);
    let mut col = HashMap::<&str, usize>::new();
    for (i, h) in headers.iter().enumerate() {
        col.entry(h.as_str()).or_insert(i);
    }

    let missing = mode
        .required_headers()
        .into_iter()
        .filter(|h| !col.contains_key(h))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(vec![format!(
            "Missing required columns: {}. Please use the sample CSV file as a template.",
            missing.join(", ")
        )]);
    }

    let mut errors = Vec::new();
    let mut rows = Vec::new();
    let mut seen_admission = HashMap::<String, usize>::new();

    for (idx, line) in lines.iter().enumerate().skip(1) {
        let row_no = idx + 1;
        let fields = parse_csv_line(line);
        let get = |name: &str| -> String {
            col.get(name)
                .and_then(|&i| fields.get(i))
                .cloned()
                .unwrap_or_default()
        };

        let name = get("name");
        let password = get("password");
        let admission_no = get("admissionNo");
        let father_name = get("fatherName");
        let mother_name = get("motherName");
        let parents_phone = get("parentsPhone");
        let roll_raw = get("rollNo");
        let email = get(EMAIL_HEADER);

        let mut push = |field: &str, e: FieldError| {
            errors.push(format!("Row {row_no}: {}", e.describe(field)));
        };
        let mut row_ok = true;
        let mut check = |field: &str, res: Option<FieldError>| {
            if let Some(e) = res {
                push(field, e);
                row_ok = false;
            }
        };

        check("name", check_min_chars(&name, NAME_MIN_CHARS));
        check("password", check_password(&password));
        check("admissionNo", check_required(&admission_no));
        check("fatherName", check_required(&father_name));
        check("motherName", check_required(&mother_name));
        check("parentsPhone", check_phone(&parents_phone));
        let roll_no = parse_roll_no(&roll_raw);
        check("rollNo", roll_no.err());
        check("email", check_optional_email(&email));

        let (class_name, section) = if mode == UploadMode::SchoolWide {
            let class_name = get("className");
            let section = get("section");
            check("className", check_required(&class_name));
            check("section", check_required(&section));
            (Some(class_name), Some(section))
        } else {
            (None, None)
        };

        if !admission_no.is_empty() {
            let key = admission_no.to_lowercase();
            if let Some(first) = seen_admission.get(&key) {
                errors.push(format!(
                    "Row {row_no}: duplicate admissionNo \"{admission_no}\" (first used in row {first})"
                ));
                row_ok = false;
            } else {
                seen_admission.insert(key, row_no);
            }
        }

        if let (true, Ok(roll_no)) = (row_ok, roll_no) {
            rows.push(BulkStudentRow {
                row: row_no,
                name,
                password,
                admission_no,
                father_name,
                mother_name,
                parents_phone,
                roll_no,
                email: Some(email).filter(|e| !e.is_empty()),
                class_name,
                section,
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    if mode == UploadMode::SchoolWide {
        let mismatches = unknown_class_rows(&rows, roster);
        if !mismatches.is_empty() {
            return Err(mismatch_report(&mismatches));
        }
    }

    Ok(rows)
}

fn unknown_class_rows<'a>(rows: &'a [BulkStudentRow], roster: &[ClassKey]) -> Vec<&'a BulkStudentRow> {
    let known = roster.iter().cloned().collect::<HashSet<_>>();
    rows.iter()
        .filter(|r| {
            let key = ClassKey::new(
                r.class_name.as_deref().unwrap_or(""),
                r.section.as_deref().unwrap_or(""),
            );
            !known.contains(&key)
        })
        .collect()
}

fn mismatch_report(mismatches: &[&BulkStudentRow]) -> Vec<String> {
    let mut out = vec![format!(
        "{} row(s) reference a class/section that does not exist. Create the class first or fix the CSV:",
        mismatches.len()
    )];
    for r in mismatches.iter().take(MAX_MISMATCH_EXAMPLES) {
        out.push(format!(
            "Row {}: className \"{}\", section \"{}\"",
            r.row,
            r.class_name.as_deref().unwrap_or(""),
            r.section.as_deref().unwrap_or("")
        ));
    }
    if mismatches.len() > MAX_MISMATCH_EXAMPLES {
        out.push(format!("+{} more", mismatches.len() - MAX_MISMATCH_EXAMPLES));
    }
    out
}

pub fn sample_csv(mode: UploadMode) -> String {
    let mut headers = STUDENT_HEADERS.to_vec();
    headers.push(EMAIL_HEADER);
    let mut rows = vec![
        vec![
            "Aarav Sharma",
            "aarav123",
            "ADM001",
            "Rajesh Sharma",
            "Sunita Sharma",
            "9876543210",
            "1",
            "aarav@example.com",
        ],
        vec![
            "Diya Patel",
            "diya1234",
            "ADM002",
            "Mahesh Patel",
            "Kavita Patel",
            "9123456780",
            "2",
            "",
        ],
    ];
    if mode == UploadMode::SchoolWide {
        headers.extend(CLASS_HEADERS);
        rows[0].extend(["5", "A"]);
        rows[1].extend(["6", "B"]);
    }

    let mut out = headers.join(",");
    out.push('\n');
    for r in rows {
        out.push_str(&r.iter().map(|f| csv_quote(f)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    out
}
