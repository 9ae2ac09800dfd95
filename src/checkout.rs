//! Plan selection flow on the dashboard side:
//! `Idle -> PreviewRequested -> Previewed -> PaymentInitiated -> {PaymentVerified | PaymentFailed}`.
//!
//! Changing any input while a quote is held drops the quote, so payment
//! always runs against a fresh preview.

use crate::pricing::{PriceInput, PriceMismatch, PricePreview};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CheckoutState {
    #[default]
    Idle,
    PreviewRequested,
    #[serde(rename_all = "camelCase")]
    Previewed {
        preview: PricePreview,
        quote_id: String,
        warnings: Vec<PriceMismatch>,
    },
    #[serde(rename_all = "camelCase")]
    PaymentInitiated {
        preview: PricePreview,
        quote_id: String,
        intent_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PaymentVerified {
        subscription_id: String,
        invoice_no: String,
    },
    #[serde(rename_all = "camelCase")]
    PaymentFailed { reason: String },
}

impl CheckoutState {
    pub fn name(&self) -> &'static str {
        match self {
            CheckoutState::Idle => "idle",
            CheckoutState::PreviewRequested => "previewRequested",
            CheckoutState::Previewed { .. } => "previewed",
            CheckoutState::PaymentInitiated { .. } => "paymentInitiated",
            CheckoutState::PaymentVerified { .. } => "paymentVerified",
            CheckoutState::PaymentFailed { .. } => "paymentFailed",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("a payment is in progress; verify or abandon it before changing the plan")]
    PaymentInProgress,
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl CheckoutError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::PaymentInProgress => "payment_in_progress",
            CheckoutError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutFlow {
    inputs: PriceInput,
    state: CheckoutState,
}

impl CheckoutFlow {
    pub fn inputs(&self) -> &PriceInput {
        &self.inputs
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    /// Returns true when a held quote was discarded.
    pub fn set_inputs(&mut self, inputs: PriceInput) -> Result<bool, CheckoutError> {
        if matches!(self.state, CheckoutState::PaymentInitiated { .. }) {
            return Err(CheckoutError::PaymentInProgress);
        }
        if inputs == self.inputs {
            return Ok(false);
        }
        self.inputs = inputs;
        let discarded = !matches!(self.state, CheckoutState::Idle);
        self.state = CheckoutState::Idle;
        Ok(discarded)
    }

    pub fn request_preview(&mut self) -> Result<PriceInput, CheckoutError> {
        match self.state {
            CheckoutState::PaymentInitiated { .. } => Err(CheckoutError::PaymentInProgress),
            CheckoutState::PreviewRequested => Err(self.invalid("request a preview")),
            _ => {
                self.state = CheckoutState::PreviewRequested;
                Ok(self.inputs.clone())
            }
        }
    }

    pub fn preview_ready(
        &mut self,
        preview: PricePreview,
        warnings: Vec<PriceMismatch>,
    ) -> Result<(), CheckoutError> {
        if self.state != CheckoutState::PreviewRequested {
            return Err(self.invalid("accept a preview"));
        }
        let quote_id = preview.quote_id();
        self.state = CheckoutState::Previewed {
            preview,
            quote_id,
            warnings,
        };
        Ok(())
    }

    /// A rejected preview leaves nothing to pay against.
    pub fn preview_failed(&mut self) {
        if self.state == CheckoutState::PreviewRequested {
            self.state = CheckoutState::Idle;
        }
    }

    /// The quote currently held, if any.
    pub fn quote(&self) -> Result<(&PricePreview, &str), CheckoutError> {
        match &self.state {
            CheckoutState::Previewed {
                preview, quote_id, ..
            } => Ok((preview, quote_id.as_str())),
            _ => Err(self.invalid("pay")),
        }
    }

    pub fn payment_initiated(&mut self, intent_id: String) -> Result<(), CheckoutError> {
        let (preview, quote_id) = match &self.state {
            CheckoutState::Previewed {
                preview, quote_id, ..
            } => (preview.clone(), quote_id.clone()),
            _ => return Err(self.invalid("start a payment")),
        };
        self.state = CheckoutState::PaymentInitiated {
            preview,
            quote_id,
            intent_id,
        };
        Ok(())
    }

    pub fn intent_id(&self) -> Result<&str, CheckoutError> {
        match &self.state {
            CheckoutState::PaymentInitiated { intent_id, .. } => Ok(intent_id.as_str()),
            _ => Err(self.invalid("verify a payment")),
        }
    }

    /// Zero-payable quotes skip the gateway and settle straight from `Previewed`.
    pub fn payment_verified(
        &mut self,
        subscription_id: String,
        invoice_no: String,
    ) -> Result<(), CheckoutError> {
        if !matches!(
            self.state,
            CheckoutState::Previewed { .. } | CheckoutState::PaymentInitiated { .. }
        ) {
            return Err(self.invalid("settle a payment"));
        }
        self.state = CheckoutState::PaymentVerified {
            subscription_id,
            invoice_no,
        };
        Ok(())
    }

    pub fn payment_failed(&mut self, reason: String) -> Result<(), CheckoutError> {
        if !matches!(self.state, CheckoutState::PaymentInitiated { .. }) {
            return Err(self.invalid("fail a payment"));
        }
        self.state = CheckoutState::PaymentFailed { reason };
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> CheckoutError {
        CheckoutError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }
}
