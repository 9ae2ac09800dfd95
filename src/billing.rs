//! Subscription store: plans, coupons, subscriptions, payments and invoices.
//!
//! Everything here re-derives prices from stored rates rather than trusting
//! figures sent by the dashboard.

use crate::pricing::{self, PlanRate, PlanStatus, PriceInput, PricePreview, PricingError, PriorPlan};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("invalid coupon: {0}")]
    InvalidCoupon(String),
    #[error("coupon waives {discount_months} months but the plan only lasts {duration_months}")]
    DiscountTooLarge {
        discount_months: u32,
        duration_months: u32,
    },
    #[error("quote {0} no longer matches the current price; request a new preview")]
    StaleQuote(String),
    #[error("amount payable is {0:.2}; start a payment intent instead")]
    PaymentRequired(f64),
    #[error("nothing to pay for this quote")]
    NothingToPay,
    #[error("payment intent not found: {0}")]
    IntentNotFound(String),
    #[error("payment {0} has been settled")]
    AlreadySettled(String),
    #[error("payment signature mismatch")]
    SignatureMismatch,
    #[error("stored timestamp is invalid: {0}")]
    BadTimestamp(String),
    #[error("stored quote for payment {0} is unreadable")]
    CorruptQuote(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl BillingError {
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Pricing(PricingError::Invalid(_)) => "validation_failed",
            BillingError::Pricing(PricingError::UnknownPlan(_)) => "not_found",
            BillingError::InvalidCoupon(_) => "invalid_coupon",
            BillingError::DiscountTooLarge { .. } => "invalid_coupon",
            BillingError::StaleQuote(_) => "stale_quote",
            BillingError::PaymentRequired(_) => "payment_required",
            BillingError::NothingToPay => "nothing_to_pay",
            BillingError::IntentNotFound(_) => "not_found",
            BillingError::AlreadySettled(_) => "already_settled",
            BillingError::SignatureMismatch => "signature_mismatch",
            BillingError::BadTimestamp(_) | BillingError::CorruptQuote(_) => "db_corrupt",
            BillingError::Db(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub now: DateTime<Utc>,
    pub grace_days: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRow {
    pub id: String,
    pub plan_id: String,
    pub billable_students: u32,
    pub starts_at: String,
    pub ends_at: String,
    pub status: PlanStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub subscription_id: String,
    pub invoice_no: String,
    pub status: PlanStatus,
    pub starts_at: String,
    pub ends_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub intent_id: String,
    pub quote_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRow {
    pub id: String,
    pub invoice_no: String,
    pub subscription_id: String,
    pub plan_id: String,
    pub billable_students: u32,
    pub original_amount: f64,
    pub discount_amount: f64,
    pub paid_amount: f64,
    pub issued_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponRow {
    pub code: String,
    pub discount_months: u32,
    pub expires_on: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillableSummary {
    pub committed_capacity: u32,
    pub enrolled_students: u32,
    pub plans: Vec<SubscriptionRow>,
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, BillingError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| BillingError::BadTimestamp(s.to_string()))
}

pub fn status_at(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    clock: &Clock,
) -> PlanStatus {
    if starts_at > clock.now {
        PlanStatus::Queued
    } else if clock.now < ends_at {
        PlanStatus::Active
    } else if Duration::try_days(clock.grace_days)
        .and_then(|grace| ends_at.checked_add_signed(grace))
        .map_or(true, |grace_ends| clock.now < grace_ends)
    {
        PlanStatus::Grace
    } else {
        PlanStatus::Expired
    }
}

pub fn list_plans(conn: &Connection) -> Result<Vec<PlanRate>, BillingError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, price_per_student_per_month, duration_months
         FROM plans
         ORDER BY duration_months DESC, price_per_student_per_month",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(PlanRate {
                plan_id: r.get(0)?,
                name: r.get(1)?,
                price_per_student_per_month: r.get(2)?,
                duration_months: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_subscriptions(conn: &Connection, clock: &Clock) -> Result<Vec<SubscriptionRow>, BillingError> {
    let mut stmt = conn.prepare(
        "SELECT id, plan_id, billable_students, starts_at, ends_at
         FROM subscriptions
         ORDER BY starts_at",
    )?;
    let raw = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, u32>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, plan_id, billable_students, starts_at, ends_at)| -> Result<SubscriptionRow, BillingError> {
            let status = status_at(parse_ts(&starts_at)?, parse_ts(&ends_at)?, clock);
            Ok(SubscriptionRow {
                id,
                plan_id,
                billable_students,
                starts_at,
                ends_at,
                status,
            })
        })
        .collect()
}

fn prior_plans(subs: &[SubscriptionRow]) -> Vec<PriorPlan> {
    subs.iter()
        .map(|s| PriorPlan {
            status: s.status,
            billable_students: s.billable_students,
        })
        .collect()
}

pub fn billable_summary(conn: &Connection, clock: &Clock) -> Result<BillableSummary, BillingError> {
    let plans = list_subscriptions(conn, clock)?
        .into_iter()
        .filter(|s| s.status.holds_capacity())
        .collect::<Vec<_>>();
    let enrolled_students: u32 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
    Ok(BillableSummary {
        committed_capacity: pricing::committed_capacity(&prior_plans(&plans)),
        enrolled_students,
        plans,
    })
}

pub fn upsert_coupon(
    conn: &Connection,
    code: &str,
    discount_months: u32,
    expires_on: Option<NaiveDate>,
    active: bool,
) -> Result<CouponRow, BillingError> {
    let code = code.trim().to_uppercase();
    let expires = expires_on.map(|d| d.format("%Y-%m-%d").to_string());
    conn.execute(
        "INSERT INTO coupons(code, discount_months, expires_on, active) VALUES(?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
           discount_months = excluded.discount_months,
           expires_on = excluded.expires_on,
           active = excluded.active",
        (&code, discount_months, &expires, active),
    )?;
    Ok(CouponRow {
        code,
        discount_months,
        expires_on: expires,
        active,
    })
}

pub fn list_coupons(conn: &Connection) -> Result<Vec<CouponRow>, BillingError> {
    let mut stmt =
        conn.prepare("SELECT code, discount_months, expires_on, active FROM coupons ORDER BY code")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(CouponRow {
                code: r.get(0)?,
                discount_months: r.get(1)?,
                expires_on: r.get(2)?,
                active: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Discount months granted by a coupon, or 0 when none was entered.
pub fn resolve_coupon(
    conn: &Connection,
    code: Option<&str>,
    today: NaiveDate,
) -> Result<u32, BillingError> {
    let Some(code) = code else {
        return Ok(0);
    };
    let row: Option<(u32, Option<String>, bool)> = conn
        .query_row(
            "SELECT discount_months, expires_on, active FROM coupons WHERE code = ?",
            [code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((discount_months, expires_on, active)) = row else {
        return Err(BillingError::InvalidCoupon(format!("{code} does not exist")));
    };
    if !active {
        return Err(BillingError::InvalidCoupon(format!("{code} is no longer active")));
    }
    if let Some(expires) = expires_on {
        let expires = NaiveDate::parse_from_str(&expires, "%Y-%m-%d")
            .map_err(|_| BillingError::BadTimestamp(expires.clone()))?;
        if today > expires {
            return Err(BillingError::InvalidCoupon(format!("{code} expired on {expires}")));
        }
    }
    Ok(discount_months)
}

/// Authoritative preview: stored rates, stored subscriptions, verified coupon.
pub fn server_preview(
    conn: &Connection,
    input: &PriceInput,
    clock: &Clock,
) -> Result<PricePreview, BillingError> {
    let rates = list_plans(conn)?;
    let prior = prior_plans(&list_subscriptions(conn, clock)?);
    pricing::validate_price_input(input, &prior).map_err(PricingError::Invalid)?;

    let coupon = input.normalized_coupon();
    let discount_months = resolve_coupon(conn, coupon.as_deref(), clock.now.date_naive())?;
    let preview = pricing::price_preview(input, &rates, &prior, discount_months)?;
    if discount_months > preview.total_months {
        return Err(BillingError::DiscountTooLarge {
            discount_months,
            duration_months: preview.total_months,
        });
    }
    Ok(preview)
}

fn quoted_preview(
    conn: &Connection,
    input: &PriceInput,
    quote_id: &str,
    clock: &Clock,
) -> Result<PricePreview, BillingError> {
    let preview = server_preview(conn, input, clock)?;
    if preview.quote_id() != quote_id {
        return Err(BillingError::StaleQuote(quote_id.to_string()));
    }
    Ok(preview)
}

/// Settles a fully discounted quote without going through the gateway.
pub fn create_payment(
    conn: &Connection,
    input: &PriceInput,
    quote_id: &str,
    clock: &Clock,
) -> Result<Activation, BillingError> {
    let preview = quoted_preview(conn, input, quote_id, clock)?;
    if preview.paid_amount > 0.0 {
        return Err(BillingError::PaymentRequired(preview.paid_amount));
    }

    let tx = conn.unchecked_transaction()?;
    let payment_id = Uuid::new_v4().to_string();
    let now = clock.now.to_rfc3339();
    tx.execute(
        "INSERT INTO payments(id, quote_id, plan_id, entered_students, future_students,
                              coupon_code, amount, preview_json, status, created_at, settled_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, ?, 'verified', ?, ?)",
        (
            &payment_id,
            quote_id,
            &preview.plan_id,
            preview.entered_students,
            preview.future_students,
            input.normalized_coupon(),
            preview_record(&preview)?,
            &now,
            &now,
        ),
    )?;
    let activation = activate(&tx, &preview, &payment_id, clock)?;
    tx.commit()?;
    tracing::info!(subscription = %activation.subscription_id, "activated fully discounted plan");
    Ok(activation)
}

pub fn create_intent(
    conn: &Connection,
    input: &PriceInput,
    quote_id: &str,
    clock: &Clock,
) -> Result<PaymentIntent, BillingError> {
    let preview = quoted_preview(conn, input, quote_id, clock)?;
    if preview.paid_amount <= 0.0 {
        return Err(BillingError::NothingToPay);
    }
    let intent_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(id, quote_id, plan_id, entered_students, future_students,
                              coupon_code, amount, preview_json, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        (
            &intent_id,
            quote_id,
            &preview.plan_id,
            preview.entered_students,
            preview.future_students,
            input.normalized_coupon(),
            preview.paid_amount,
            preview_record(&preview)?,
            clock.now.to_rfc3339(),
        ),
    )?;
    tracing::info!(intent = %intent_id, amount = preview.paid_amount, "payment intent created");
    Ok(PaymentIntent {
        intent_id,
        quote_id: quote_id.to_string(),
        amount: preview.paid_amount,
    })
}

/// Hex SHA-256 of `intentId|paymentId|secret`, as produced by the gateway callback.
pub fn payment_signature(intent_id: &str, payment_id: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{intent_id}|{payment_id}|{secret}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Settles an intent once the gateway signature checks out. Activation uses
/// the preview recorded with the intent; the gateway has already charged that
/// amount, so coupon and capacity rules are not re-applied.
pub fn verify_payment(
    conn: &Connection,
    intent_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    secret: &str,
    clock: &Clock,
) -> Result<Activation, BillingError> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT quote_id, preview_json, status FROM payments WHERE id = ?",
            [intent_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((quote_id, preview_json, status)) = row else {
        return Err(BillingError::IntentNotFound(intent_id.to_string()));
    };
    if status != "pending" {
        return Err(BillingError::AlreadySettled(intent_id.to_string()));
    }

    let now = clock.now.to_rfc3339();
    if payment_signature(intent_id, gateway_payment_id, secret) != signature.trim() {
        conn.execute(
            "UPDATE payments SET status = 'failed', gateway_payment_id = ?, settled_at = ? WHERE id = ?",
            (gateway_payment_id, &now, intent_id),
        )?;
        tracing::warn!(intent = %intent_id, "payment signature mismatch");
        return Err(BillingError::SignatureMismatch);
    }

    let preview: PricePreview = serde_json::from_str(&preview_json)
        .ok()
        .filter(|p: &PricePreview| p.quote_id() == quote_id)
        .ok_or_else(|| BillingError::CorruptQuote(intent_id.to_string()))?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE payments SET status = 'verified', gateway_payment_id = ?, settled_at = ? WHERE id = ?",
        (gateway_payment_id, &now, intent_id),
    )?;
    let activation = activate(&tx, &preview, intent_id, clock)?;
    tx.commit()?;
    tracing::info!(
        intent = %intent_id,
        subscription = %activation.subscription_id,
        status = activation.status.as_str(),
        "payment verified"
    );
    Ok(activation)
}

fn preview_record(preview: &PricePreview) -> Result<String, BillingError> {
    serde_json::to_string(preview).map_err(|_| BillingError::CorruptQuote(preview.quote_id()))
}

/// New plans start when the last committed plan ends, or now if none is pending.
fn activate(
    conn: &Connection,
    preview: &PricePreview,
    payment_id: &str,
    clock: &Clock,
) -> Result<Activation, BillingError> {
    let subs = list_subscriptions(conn, clock)?;
    let mut starts_at = clock.now;
    for s in subs.iter().filter(|s| s.status.holds_capacity()) {
        let ends = parse_ts(&s.ends_at)?;
        if ends > starts_at {
            starts_at = ends;
        }
    }
    let ends_at = starts_at
        .checked_add_months(Months::new(preview.total_months))
        .ok_or_else(|| BillingError::BadTimestamp(starts_at.to_rfc3339()))?;

    let subscription_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subscriptions(id, plan_id, billable_students, starts_at, ends_at, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &subscription_id,
            &preview.plan_id,
            preview.billable_students,
            starts_at.to_rfc3339(),
            ends_at.to_rfc3339(),
            clock.now.to_rfc3339(),
        ),
    )?;

    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    let invoice_no = format!("INV-{}-{}", clock.now.format("%Y%m"), suffix);
    conn.execute(
        "INSERT INTO invoices(id, invoice_no, payment_id, subscription_id, plan_id, billable_students,
                              original_amount, discount_amount, paid_amount, issued_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &invoice_no,
            payment_id,
            &subscription_id,
            &preview.plan_id,
            preview.billable_students,
            preview.original_amount,
            preview.discount_amount,
            preview.paid_amount,
            clock.now.to_rfc3339(),
        ),
    )?;

    Ok(Activation {
        subscription_id,
        invoice_no,
        status: status_at(starts_at, ends_at, clock),
        starts_at: starts_at.to_rfc3339(),
        ends_at: ends_at.to_rfc3339(),
    })
}

pub fn list_invoices(conn: &Connection) -> Result<Vec<InvoiceRow>, BillingError> {
    let mut stmt = conn.prepare(
        "SELECT id, invoice_no, subscription_id, plan_id, billable_students,
                original_amount, discount_amount, paid_amount, issued_at
         FROM invoices
         ORDER BY issued_at DESC, invoice_no",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(InvoiceRow {
                id: r.get(0)?,
                invoice_no: r.get(1)?,
                subscription_id: r.get(2)?,
                plan_id: r.get(3)?,
                billable_students: r.get(4)?,
                original_amount: r.get(5)?,
                discount_amount: r.get(6)?,
                paid_amount: r.get(7)?,
                issued_at: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}-{}",
            prefix,
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn clock() -> Clock {
        Clock {
            now: Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
            grace_days: 7,
        }
    }

    fn input(entered: u32, coupon: Option<&str>) -> PriceInput {
        PriceInput {
            plan_id: "basic".into(),
            entered_students: entered,
            future_students: 0,
            coupon_code: coupon.map(str::to_string),
        }
    }

    #[test]
    fn status_follows_dates_and_grace() {
        let c = clock();
        let day = Duration::days(1);
        assert_eq!(status_at(c.now + day, c.now + day * 30, &c), PlanStatus::Queued);
        assert_eq!(status_at(c.now - day, c.now + day, &c), PlanStatus::Active);
        assert_eq!(status_at(c.now - day * 30, c.now - day * 3, &c), PlanStatus::Grace);
        assert_eq!(status_at(c.now - day * 30, c.now - day * 8, &c), PlanStatus::Expired);
    }

    #[test]
    fn oversized_grace_window_does_not_overflow() {
        let c = Clock {
            grace_days: i64::MAX,
            ..clock()
        };
        let day = Duration::days(1);
        assert_eq!(status_at(c.now - day * 30, c.now - day * 8, &c), PlanStatus::Grace);
    }

    #[test]
    fn preview_applies_coupon_and_rejects_bad_ones() {
        let ws = temp_workspace("schoold-billing-coupon");
        let conn = db::open_db(&ws).expect("open db");
        let c = clock();
        upsert_coupon(&conn, "save2", 2, None, true).expect("coupon");
        upsert_coupon(&conn, "OLD", 1, NaiveDate::from_ymd_opt(2026, 1, 1), true).expect("coupon");
        upsert_coupon(&conn, "OFF", 1, None, false).expect("coupon");
        upsert_coupon(&conn, "HUGE", 13, None, true).expect("coupon");

        let p = server_preview(&conn, &input(50, Some(" Save2 ")), &c).expect("preview");
        assert_eq!(p.discount_months, 2);
        assert_eq!(p.paid_amount, 6000.0 - 1000.0);

        for code in ["OLD", "OFF", "NOPE"] {
            assert_matches!(
                server_preview(&conn, &input(50, Some(code)), &c),
                Err(BillingError::InvalidCoupon(_))
            );
        }
        assert_matches!(
            server_preview(&conn, &input(7, Some("NOPE")), &c),
            Err(BillingError::Pricing(PricingError::Invalid(errs))) if errs.entered_students.is_some()
        );
        assert_matches!(
            server_preview(&conn, &input(50, Some("HUGE")), &c),
            Err(BillingError::DiscountTooLarge { discount_months: 13, duration_months: 12 })
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn verified_payment_queues_after_active_plan() {
        let ws = temp_workspace("schoold-billing-verify");
        let conn = db::open_db(&ws).expect("open db");
        let c = clock();

        let first = input(50, None);
        let quote = server_preview(&conn, &first, &c).expect("preview").quote_id();
        let intent = create_intent(&conn, &first, &quote, &c).expect("intent");
        assert_eq!(intent.amount, 6000.0);
        let sig = payment_signature(&intent.intent_id, "pay_1", "secret");
        let act = verify_payment(&conn, &intent.intent_id, "pay_1", &sig, "secret", &c)
            .expect("verify");
        assert_eq!(act.status, PlanStatus::Active);

        assert_matches!(
            verify_payment(&conn, &intent.intent_id, "pay_1", &sig, "secret", &c),
            Err(BillingError::AlreadySettled(_))
        );

        // Capacity floor now applies.
        assert_matches!(
            server_preview(&conn, &input(40, None), &c),
            Err(BillingError::Pricing(PricingError::Invalid(_)))
        );

        let second = input(60, None);
        let quote = server_preview(&conn, &second, &c).expect("preview").quote_id();
        let intent = create_intent(&conn, &second, &quote, &c).expect("intent");
        let sig = payment_signature(&intent.intent_id, "pay_2", "secret");
        let act2 = verify_payment(&conn, &intent.intent_id, "pay_2", &sig, "secret", &c)
            .expect("verify");
        assert_eq!(act2.status, PlanStatus::Queued);
        assert_eq!(act2.starts_at, act.ends_at);

        let summary = billable_summary(&conn, &c).expect("summary");
        assert_eq!(summary.committed_capacity, 60);
        assert_eq!(summary.plans.len(), 2);
        assert_eq!(list_invoices(&conn).expect("invoices").len(), 2);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn concurrent_intents_both_settle_after_signature_checks() {
        let ws = temp_workspace("schoold-billing-two-intents");
        let conn = db::open_db(&ws).expect("open db");
        let c = clock();
        upsert_coupon(&conn, "SAVE1", 1, None, true).expect("coupon");

        let larger = input(60, None);
        let quote_a = server_preview(&conn, &larger, &c).expect("preview").quote_id();
        let intent_a = create_intent(&conn, &larger, &quote_a, &c).expect("intent a");

        let smaller = input(50, Some("save1"));
        let quote_b = server_preview(&conn, &smaller, &c).expect("preview").quote_id();
        let intent_b = create_intent(&conn, &smaller, &quote_b, &c).expect("intent b");
        assert_eq!(intent_b.amount, 5500.0);

        let sig_a = payment_signature(&intent_a.intent_id, "pay_a", "secret");
        let act_a = verify_payment(&conn, &intent_a.intent_id, "pay_a", &sig_a, "secret", &c)
            .expect("verify a");

        // The floor is now 60 and the coupon is gone; B was already charged.
        upsert_coupon(&conn, "SAVE1", 1, None, false).expect("disable coupon");
        let sig_b = payment_signature(&intent_b.intent_id, "pay_b", "secret");
        let act_b = verify_payment(&conn, &intent_b.intent_id, "pay_b", &sig_b, "secret", &c)
            .expect("verify b");
        assert_eq!(act_b.status, PlanStatus::Queued);
        assert_eq!(act_b.starts_at, act_a.ends_at);

        let status: String = conn
            .query_row(
                "SELECT status FROM payments WHERE id = ?",
                [&intent_b.intent_id],
                |r| r.get(0),
            )
            .expect("payment row");
        assert_eq!(status, "verified");
        let invoices = list_invoices(&conn).expect("invoices");
        assert_eq!(invoices.len(), 2);
        assert!(invoices.iter().any(|i| i.paid_amount == 5500.0 && i.billable_students == 50));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn bad_signature_fails_the_intent() {
        let ws = temp_workspace("schoold-billing-badsig");
        let conn = db::open_db(&ws).expect("open db");
        let c = clock();
        let i = input(20, None);
        let quote = server_preview(&conn, &i, &c).expect("preview").quote_id();
        let intent = create_intent(&conn, &i, &quote, &c).expect("intent");
        assert_matches!(
            verify_payment(&conn, &intent.intent_id, "pay_x", "deadbeef", "secret", &c),
            Err(BillingError::SignatureMismatch)
        );
        assert!(list_subscriptions(&conn, &c).expect("subs").is_empty());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn stale_quote_and_zero_payable_paths() {
        let ws = temp_workspace("schoold-billing-zero");
        let conn = db::open_db(&ws).expect("open db");
        let c = clock();
        upsert_coupon(&conn, "FREEYEAR", 12, None, true).expect("coupon");

        let paid = input(30, None);
        assert_matches!(
            create_intent(&conn, &paid, "not-a-quote", &c),
            Err(BillingError::StaleQuote(_))
        );
        let quote = server_preview(&conn, &paid, &c).expect("preview").quote_id();
        assert_matches!(
            create_payment(&conn, &paid, &quote, &c),
            Err(BillingError::PaymentRequired(_))
        );

        let free = input(30, Some("freeyear"));
        let preview = server_preview(&conn, &free, &c).expect("preview");
        assert_eq!(preview.paid_amount, 0.0);
        assert_matches!(
            create_intent(&conn, &free, &preview.quote_id(), &c),
            Err(BillingError::NothingToPay)
        );
        let act = create_payment(&conn, &free, &preview.quote_id(), &c).expect("activate");
        assert!(act.invoice_no.starts_with("INV-202604-"));
        let _ = std::fs::remove_dir_all(ws);
    }
}
