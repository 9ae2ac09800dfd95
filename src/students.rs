use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const NAME_MIN_CHARS: usize = 3;
pub const PASSWORD_MIN_CHARS: usize = 6;
pub const PHONE_MIN_DIGITS: usize = 10;
// Enforced bound is 200 even though the upload screen has long described it as 100.
pub const ROLL_NO_MAX: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldError {
    Required,
    TooShort { min: usize },
    NotEnoughDigits { min: usize },
    NotPositiveInteger,
    OutOfRange { max: u32 },
    InvalidEmail,
}

impl FieldError {
    pub fn describe(&self, field: &str) -> String {
        match self {
            FieldError::Required => format!("{field} is required"),
            FieldError::TooShort { min } => {
                format!("{field} must be at least {min} characters")
            }
            FieldError::NotEnoughDigits { min } => {
                format!("{field} must contain at least {min} digits")
            }
            FieldError::NotPositiveInteger => format!("{field} must be a positive integer"),
            FieldError::OutOfRange { max } => format!("{field} must not exceed {max}"),
            FieldError::InvalidEmail => format!("{field} is not a valid email address"),
        }
    }
}

pub fn check_min_chars(value: &str, min: usize) -> Option<FieldError> {
    let v = value.trim();
    if v.is_empty() {
        return Some(FieldError::Required);
    }
    if v.chars().count() < min {
        return Some(FieldError::TooShort { min });
    }
    None
}

/// Passwords are counted as typed; surrounding spaces are part of them.
pub fn check_password(value: &str) -> Option<FieldError> {
    if value.trim().is_empty() {
        return Some(FieldError::Required);
    }
    if value.chars().count() < PASSWORD_MIN_CHARS {
        return Some(FieldError::TooShort {
            min: PASSWORD_MIN_CHARS,
        });
    }
    None
}

pub fn check_required(value: &str) -> Option<FieldError> {
    if value.trim().is_empty() {
        Some(FieldError::Required)
    } else {
        None
    }
}

pub fn check_phone(value: &str) -> Option<FieldError> {
    if value.trim().is_empty() {
        return Some(FieldError::Required);
    }
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < PHONE_MIN_DIGITS {
        return Some(FieldError::NotEnoughDigits {
            min: PHONE_MIN_DIGITS,
        });
    }
    None
}

pub fn parse_roll_no(value: &str) -> Result<u32, FieldError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(FieldError::Required);
    }
    if !v.chars().all(|c| c.is_ascii_digit()) {
        return Err(FieldError::NotPositiveInteger);
    }
    let n = v
        .parse::<u32>()
        .map_err(|_| FieldError::OutOfRange { max: ROLL_NO_MAX })?;
    if n == 0 {
        return Err(FieldError::NotPositiveInteger);
    }
    if n > ROLL_NO_MAX {
        return Err(FieldError::OutOfRange { max: ROLL_NO_MAX });
    }
    Ok(n)
}

/// Basic `local@domain.tld` shape. Blank means "not provided".
pub fn check_optional_email(value: &str) -> Option<FieldError> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if looks_like_email(v) {
        None
    } else {
        Some(FieldError::InvalidEmail)
    }
}

fn looks_like_email(v: &str) -> bool {
    if v.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = v.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentDraft {
    pub name: String,
    pub password: String,
    pub admission_no: String,
    pub father_name: String,
    pub mother_name: String,
    pub parents_phone: String,
    pub roll_no: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFormErrors {
    pub name: Option<FieldError>,
    pub password: Option<FieldError>,
    pub admission_no: Option<FieldError>,
    pub father_name: Option<FieldError>,
    pub mother_name: Option<FieldError>,
    pub parents_phone: Option<FieldError>,
    pub roll_no: Option<FieldError>,
    pub email: Option<FieldError>,
}

impl StudentFormErrors {
    pub fn is_empty(&self) -> bool {
        *self == StudentFormErrors::default()
    }
}

pub fn validate_student_form(draft: &StudentDraft) -> StudentFormErrors {
    StudentFormErrors {
        name: check_min_chars(&draft.name, NAME_MIN_CHARS),
        password: check_password(&draft.password),
        admission_no: check_required(&draft.admission_no),
        father_name: check_required(&draft.father_name),
        mother_name: check_required(&draft.mother_name),
        parents_phone: check_phone(&draft.parents_phone),
        roll_no: parse_roll_no(&draft.roll_no).err(),
        email: draft.email.as_deref().and_then(check_optional_email),
    }
}

pub fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
