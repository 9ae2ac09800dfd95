use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MIN_CURRENT_STUDENTS: u32 = 10;
pub const CURRENT_STUDENTS_STEP: u32 = 10;
pub const FUTURE_STUDENTS_STEP: u32 = 5;
/// Payable amounts closer than this are treated as equal when reconciling.
pub const PAYABLE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRate {
    pub plan_id: String,
    pub name: String,
    pub price_per_student_per_month: f64,
    pub duration_months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Grace,
    Queued,
    Expired,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Grace => "grace",
            PlanStatus::Queued => "queued",
            PlanStatus::Expired => "expired",
        }
    }

    /// Whether a plan in this state still commits the school to its capacity.
    pub fn holds_capacity(self) -> bool {
        !matches!(self, PlanStatus::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorPlan {
    pub status: PlanStatus,
    pub billable_students: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInput {
    pub plan_id: String,
    pub entered_students: u32,
    #[serde(default)]
    pub future_students: u32,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl PriceInput {
    pub fn total_students(&self) -> u32 {
        self.entered_students.saturating_add(self.future_students)
    }

    pub fn normalized_coupon(&self) -> Option<String> {
        self.coupon_code
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInputErrors {
    pub entered_students: Option<String>,
    pub future_students: Option<String>,
    pub total_students: Option<String>,
}

impl PriceInputErrors {
    pub fn is_empty(&self) -> bool {
        *self == PriceInputErrors::default()
    }

    pub fn messages(&self) -> Vec<String> {
        [
            &self.entered_students,
            &self.future_students,
            &self.total_students,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("{}", .0.messages().join("; "))]
    Invalid(PriceInputErrors),
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePreview {
    pub plan_id: String,
    pub entered_students: u32,
    pub future_students: u32,
    pub billable_students: u32,
    pub price_per_student_per_month: f64,
    pub total_months: u32,
    pub monthly_cost: f64,
    pub original_amount: f64,
    pub discount_months: u32,
    pub discount_amount: f64,
    pub paid_amount: f64,
}

impl PricePreview {
    /// Fingerprint of the quoted numbers. Payments are bound to it so a
    /// stale quote cannot be paid.
    pub fn quote_id(&self) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{:.4}|{}|{}|{:.2}",
            self.plan_id,
            self.entered_students,
            self.future_students,
            self.billable_students,
            self.price_per_student_per_month,
            self.total_months,
            self.discount_months,
            self.paid_amount
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Largest capacity any active, grace or queued plan already commits to.
pub fn committed_capacity(prior: &[PriorPlan]) -> u32 {
    prior
        .iter()
        .filter(|p| p.status.holds_capacity())
        .map(|p| p.billable_students)
        .max()
        .unwrap_or(0)
}

pub fn validate_price_input(input: &PriceInput, prior: &[PriorPlan]) -> Result<(), PriceInputErrors> {
    let mut errs = PriceInputErrors::default();

    if input.entered_students < MIN_CURRENT_STUDENTS {
        errs.entered_students = Some(format!(
            "Current students must be at least {MIN_CURRENT_STUDENTS}"
        ));
    } else if input.entered_students % CURRENT_STUDENTS_STEP != 0 {
        errs.entered_students = Some(format!(
            "Current students must be a multiple of {CURRENT_STUDENTS_STEP}"
        ));
    }

    if input.future_students != 0 && input.future_students % FUTURE_STUDENTS_STEP != 0 {
        errs.future_students = Some(format!(
            "Future students must be a multiple of {FUTURE_STUDENTS_STEP}"
        ));
    }

    let floor = committed_capacity(prior);
    let total = input.total_students();
    if total < floor {
        errs.total_students = Some(format!(
            "Total students ({total}) cannot be lower than your committed capacity of {floor} students"
        ));
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

/// Pure arithmetic; callers validate first.
pub fn compute_preview(input: &PriceInput, rate: &PlanRate, discount_months: u32) -> PricePreview {
    let billable_students = input.total_students();
    let monthly_cost = f64::from(billable_students) * rate.price_per_student_per_month;
    let original_amount = monthly_cost * f64::from(rate.duration_months);
    let discount_amount = monthly_cost * f64::from(discount_months);
    PricePreview {
        plan_id: rate.plan_id.clone(),
        entered_students: input.entered_students,
        future_students: input.future_students,
        billable_students,
        price_per_student_per_month: rate.price_per_student_per_month,
        total_months: rate.duration_months,
        monthly_cost,
        original_amount,
        discount_months,
        discount_amount,
        paid_amount: original_amount - discount_amount,
    }
}

pub fn price_preview(
    input: &PriceInput,
    rates: &[PlanRate],
    prior: &[PriorPlan],
    discount_months: u32,
) -> Result<PricePreview, PricingError> {
    validate_price_input(input, prior).map_err(PricingError::Invalid)?;
    let rate = rates
        .iter()
        .find(|r| r.plan_id == input.plan_id)
        .ok_or_else(|| PricingError::UnknownPlan(input.plan_id.clone()))?;
    Ok(compute_preview(input, rate, discount_months))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum PriceMismatch {
    Payable { local: f64, server: f64 },
    Rate { local: f64, server: f64 },
    Duration { local: u32, server: u32 },
}

impl PriceMismatch {
    pub fn describe(&self) -> String {
        match self {
            PriceMismatch::Payable { local, server } => {
                format!("Payable amount differs: expected {local:.2}, server quoted {server:.2}")
            }
            PriceMismatch::Rate { local, server } => {
                format!("Price per student differs: expected {local}, server quoted {server}")
            }
            PriceMismatch::Duration { local, server } => {
                format!("Plan duration differs: expected {local} months, server quoted {server}")
            }
        }
    }
}

/// Compares a locally computed preview with the backend's. Empty means consistent.
pub fn reconcile(local: &PricePreview, server: &PricePreview) -> Vec<PriceMismatch> {
    let mut out = Vec::new();
    if (local.paid_amount - server.paid_amount).abs() > PAYABLE_TOLERANCE {
        out.push(PriceMismatch::Payable {
            local: local.paid_amount,
            server: server.paid_amount,
        });
    }
    if local.price_per_student_per_month != server.price_per_student_per_month {
        out.push(PriceMismatch::Rate {
            local: local.price_per_student_per_month,
            server: server.price_per_student_per_month,
        });
    }
    if local.total_months != server.total_months {
        out.push(PriceMismatch::Duration {
            local: local.total_months,
            server: server.total_months,
        });
    }
    out
}
