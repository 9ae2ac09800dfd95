/// Where a backend message surfaced; picks the wording for known failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageContext {
    Class,
    Session,
    Student,
    Payment,
}

/// Known backend failures get dashboard-friendly text; anything else is
/// passed through verbatim.
pub fn friendly_message(ctx: MessageContext, raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("already exists") {
        return match ctx {
            MessageContext::Class => {
                "A class with this name and section already exists.".to_string()
            }
            MessageContext::Session => "An academic session with this name already exists.".to_string(),
            MessageContext::Student => {
                "A student with this admission number already exists.".to_string()
            }
            MessageContext::Payment => "This payment has already been recorded.".to_string(),
        };
    }
    if lower.contains("no active session") {
        return "No active academic session. Create and activate a session first.".to_string();
    }
    raw.to_string()
}
