use crate::billing;
use crate::ipc::error::{get_optional_str, get_required_str, parse_params, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::messages::{friendly_message, MessageContext};
use crate::pricing::PriceInput;
use chrono::NaiveDate;
use serde_json::{json, Value};

/// The price inputs may arrive nested under `input` or flat in `params`.
fn price_input(params: &Value) -> Result<PriceInput, HandlerErr> {
    parse_params(params.get("input").unwrap_or(params))
}

fn payment_failure(e: billing::BillingError) -> HandlerErr {
    let e = HandlerErr::from(e);
    let friendly = friendly_message(MessageContext::Payment, &e.message);
    let mut details = e.details.clone().unwrap_or_else(|| json!({}));
    details["friendlyMessage"] = json!(friendly);
    e.with_details(details)
}

fn subscription_plans(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    Ok(json!({ "plans": billing::list_plans(conn)? }))
}

fn subscription_billable_students(state: &mut AppState) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let conn = state.conn()?;
    Ok(json!(billing::billable_summary(conn, &clock)?))
}

fn subscription_price_preview(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let conn = state.conn()?;
    let input = price_input(params)?;
    let preview = billing::server_preview(conn, &input, &clock)?;
    Ok(json!({ "quoteId": preview.quote_id(), "preview": preview }))
}

fn subscription_create_payment(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let conn = state.conn()?;
    let input = price_input(params)?;
    let quote_id = get_required_str(params, "quoteId")?;
    let activation =
        billing::create_payment(conn, &input, &quote_id, &clock).map_err(payment_failure)?;
    Ok(json!(activation))
}

fn subscription_invoices(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    Ok(json!({ "invoices": billing::list_invoices(conn)? }))
}

fn payment_create_intent(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let conn = state.conn()?;
    let input = price_input(params)?;
    let quote_id = get_required_str(params, "quoteId")?;
    let intent =
        billing::create_intent(conn, &input, &quote_id, &clock).map_err(payment_failure)?;
    Ok(json!(intent))
}

fn payment_verify(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let conn = state.conn()?;
    let intent_id = get_required_str(params, "intentId")?;
    let payment_id = get_required_str(params, "paymentId")?;
    let signature = get_required_str(params, "signature")?;
    let activation = billing::verify_payment(
        conn,
        &intent_id,
        &payment_id,
        &signature,
        &state.config.payment_secret,
        &clock,
    )
    .map_err(payment_failure)?;
    Ok(json!(activation))
}

fn coupons_upsert(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let code = get_required_str(params, "code")?;
    let discount_months = params
        .get("discountMonths")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| HandlerErr::new("bad_params", "discountMonths must be a positive integer"))?;
    let expires_on = get_optional_str(params, "expiresOn")
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| HandlerErr::new("bad_params", "expiresOn must be a YYYY-MM-DD date"))
        })
        .transpose()?;
    let active = params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
    let coupon = billing::upsert_coupon(conn, &code, discount_months, expires_on, active)?;
    tracing::info!(code = %coupon.code, discount_months, active, "coupon saved");
    Ok(json!(coupon))
}

fn coupons_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    Ok(json!({ "coupons": billing::list_coupons(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "subscription.plans" => subscription_plans(state),
        "subscription.billableStudents" => subscription_billable_students(state),
        "subscription.pricePreview" => subscription_price_preview(state, &req.params),
        "subscription.createPayment" => subscription_create_payment(state, &req.params),
        "subscription.invoices" => subscription_invoices(state),
        "payment.createIntent" => payment_create_intent(state, &req.params),
        "payment.verify" => payment_verify(state, &req.params),
        "coupons.upsert" => coupons_upsert(state, &req.params),
        "coupons.list" => coupons_list(state),
        _ => return None,
    };
    let invalidates: &[&str] = match req.method.as_str() {
        "subscription.createPayment" | "payment.verify" => {
            &["subscription", "billableStudents", "invoices"]
        }
        "coupons.upsert" => &["coupons"],
        _ => &[],
    };
    Some(respond(&req.id, result, invalidates))
}
