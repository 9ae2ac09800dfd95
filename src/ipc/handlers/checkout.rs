use crate::billing::{self, BillingError};
use crate::checkout::CheckoutState;
use crate::ipc::error::{get_required_str, parse_params, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::messages::{friendly_message, MessageContext};
use crate::pricing::{self, PriceInput, PriceMismatch};
use serde_json::{json, Value};

fn snapshot(state: &AppState) -> Value {
    json!({
        "inputs": state.checkout.inputs(),
        "checkout": state.checkout.state(),
    })
}

fn checkout_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    Ok(snapshot(state))
}

fn checkout_set_inputs(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let inputs: PriceInput = parse_params(params.get("input").unwrap_or(params))?;
    let discarded = state.checkout.set_inputs(inputs)?;
    if discarded {
        tracing::debug!("inputs changed; held quote discarded");
    }
    let mut out = snapshot(state);
    out["quoteDiscarded"] = json!(discarded);
    Ok(out)
}

fn checkout_preview(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    if let Some(raw) = params.get("input") {
        let inputs: PriceInput = parse_params(raw)?;
        state.checkout.set_inputs(inputs)?;
    }
    let clock = state.clock();
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let input = state.checkout.request_preview()?;

    let quoted = billing::server_preview(conn, &input, &clock).and_then(|server| {
        let rates = billing::list_plans(conn)?;
        let rate = rates
            .iter()
            .find(|r| r.plan_id == input.plan_id)
            .ok_or_else(|| pricing::PricingError::UnknownPlan(input.plan_id.clone()))?;
        let local = pricing::compute_preview(&input, rate, server.discount_months);
        Ok((local, server))
    });
    let (local, server) = match quoted {
        Ok(pair) => pair,
        Err(e) => {
            state.checkout.preview_failed();
            return Err(e.into());
        }
    };

    let warnings = pricing::reconcile(&local, &server);
    if !warnings.is_empty() {
        tracing::warn!(mismatches = warnings.len(), plan = %input.plan_id, "local and server previews disagree");
    }
    let messages = warnings.iter().map(PriceMismatch::describe).collect::<Vec<_>>();
    state.checkout.preview_ready(server.clone(), warnings)?;
    Ok(json!({
        "quoteId": server.quote_id(),
        "local": local,
        "server": server,
        "warnings": messages,
        "checkout": state.checkout.state(),
    }))
}

/// A stale quote can never be paid; the flow goes back to `Idle` with the
/// same inputs.
fn drop_stale_quote(state: &mut AppState, input: PriceInput, e: BillingError) -> HandlerErr {
    if matches!(e, BillingError::StaleQuote(_)) {
        state.checkout = Default::default();
        if let Err(reset) = state.checkout.set_inputs(input) {
            return reset.into();
        }
        tracing::debug!("stale quote dropped");
    }
    e.into()
}

fn checkout_pay(state: &mut AppState) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let (preview, quote_id) = state.checkout.quote()?;
    let (paid_amount, quote_id) = (preview.paid_amount, quote_id.to_string());
    let input = state.checkout.inputs().clone();
    let conn = state.db.as_ref().ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    if paid_amount <= 0.0 {
        let activation = match billing::create_payment(conn, &input, &quote_id, &clock) {
            Ok(activation) => activation,
            Err(e) => return Err(drop_stale_quote(state, input, e)),
        };
        state
            .checkout
            .payment_verified(activation.subscription_id.clone(), activation.invoice_no.clone())?;
        return Ok(json!({
            "activation": activation,
            "checkout": state.checkout.state(),
        }));
    }

    let intent = match billing::create_intent(conn, &input, &quote_id, &clock) {
        Ok(intent) => intent,
        Err(e) => return Err(drop_stale_quote(state, input, e)),
    };
    state.checkout.payment_initiated(intent.intent_id.clone())?;
    Ok(json!({
        "intent": intent,
        "checkout": state.checkout.state(),
    }))
}

fn checkout_verify(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let clock = state.clock();
    let intent_id = state.checkout.intent_id()?.to_string();
    let payment_id = get_required_str(params, "paymentId")?;
    let signature = get_required_str(params, "signature")?;
    let conn = state.db.as_ref().ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    match billing::verify_payment(
        conn,
        &intent_id,
        &payment_id,
        &signature,
        &state.config.payment_secret,
        &clock,
    ) {
        Ok(activation) => {
            state
                .checkout
                .payment_verified(activation.subscription_id.clone(), activation.invoice_no.clone())?;
            Ok(json!({
                "activation": activation,
                "checkout": state.checkout.state(),
            }))
        }
        Err(BillingError::Db(e)) => Err(e.into()),
        Err(e) => {
            let reason = friendly_message(MessageContext::Payment, &e.to_string());
            state.checkout.payment_failed(reason)?;
            let checkout = json!(state.checkout.state());
            let err = HandlerErr::from(e);
            Err(err.with_details(json!({ "checkout": checkout })))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "checkout.get" => checkout_get(state),
        "checkout.setInputs" => checkout_set_inputs(state, &req.params),
        "checkout.preview" => checkout_preview(state, &req.params),
        "checkout.pay" => checkout_pay(state),
        "checkout.verify" => checkout_verify(state, &req.params),
        _ => return None,
    };
    let settled = result.is_ok()
        && matches!(state.checkout.state(), CheckoutState::PaymentVerified { .. })
        && matches!(req.method.as_str(), "checkout.pay" | "checkout.verify");
    let invalidates: &[&str] = if settled {
        &["subscription", "billableStudents", "invoices"]
    } else {
        &[]
    };
    Some(respond(&req.id, result, invalidates))
}
