use serde_json::{json, Value};

use crate::billing::BillingError;
use crate::checkout::CheckoutError;

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Success reply for a mutation. `invalidates` names the resources the
/// dashboard should refetch.
pub fn ok_invalidating(id: &str, result: Value, invalidates: &[&str]) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result,
        "invalidates": invalidates,
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        tracing::debug!(request = %id, code = self.code, message = %self.message, "request failed");
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<BillingError> for HandlerErr {
    fn from(e: BillingError) -> Self {
        let code = e.code();
        match e {
            BillingError::Pricing(crate::pricing::PricingError::Invalid(errs)) => {
                HandlerErr::new(code, errs.messages().join("; "))
                    .with_details(json!({ "fieldErrors": errs }))
            }
            other => HandlerErr::new(code, other.to_string()),
        }
    }
}

impl From<CheckoutError> for HandlerErr {
    fn from(e: CheckoutError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>, invalidates: &[&str]) -> Value {
    match result {
        Ok(v) if invalidates.is_empty() => ok(id, v),
        Ok(v) => ok_invalidating(id, v, invalidates),
        Err(e) => e.response(id),
    }
}
