//! Payment Error Types
//!
//! Every give-up state is user-visible and carries a stable code the UI
//! maps to an affordance (fix input, retry, check status, recreate).

use thiserror::Error;

use super::api::ApiError;
use super::types::RailKind;
use crate::core_types::IntentToken;
use crate::money::MoneyError;
use crate::snapshot::SnapshotError;

/// Payment error taxonomy
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    // === Input ===
    #[error("Validation failed: {0}")]
    Validation(String),

    // === One-shot remote calls ===
    #[error("Remote call failed: {0}")]
    Remote(String),

    // === Transports ===
    #[error("Confirmation transport gave up after {attempts} reconnect attempts")]
    Connectivity { attempts: u32 },

    // === Rails ===
    #[error("{rail} rejected the payment: {reason}")]
    RailRejection { rail: RailKind, reason: String },

    // === Lifecycle ===
    #[error("Payment intent {0} expired without a terminal confirmation")]
    Expired(IntentToken),

    #[error("No active payment intent for {0}")]
    NoActiveIntent(String),

    #[error("A payment flow for {0} is already running")]
    FlowInProgress(String),

    // === Local ===
    #[error("Snapshot storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Stable error code for the UI layer
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "VALIDATION_ERROR",
            PaymentError::Remote(_) => "REMOTE_ERROR",
            PaymentError::Connectivity { .. } => "CONNECTIVITY_ERROR",
            PaymentError::RailRejection { .. } => "RAIL_REJECTION",
            PaymentError::Expired(_) => "EXPIRED",
            PaymentError::NoActiveIntent(_) => "NO_ACTIVE_INTENT",
            PaymentError::FlowInProgress(_) => "FLOW_IN_PROGRESS",
            PaymentError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// The same intent can be resumed by a manual user action
    ///
    /// Validation errors need new input and expired intents must be
    /// recreated; everything else keeps the intent alive.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            PaymentError::Remote(_)
                | PaymentError::Connectivity { .. }
                | PaymentError::RailRejection { .. }
                | PaymentError::Storage(_)
        )
    }
}

impl From<MoneyError> for PaymentError {
    fn from(e: MoneyError) -> Self {
        PaymentError::Validation(e.to_string())
    }
}

impl From<ApiError> for PaymentError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Rejected { .. } => PaymentError::Validation(e.to_string()),
            other => PaymentError::Remote(other.to_string()),
        }
    }
}

impl From<SnapshotError> for PaymentError {
    fn from(e: SnapshotError) -> Self {
        PaymentError::Storage(e.to_string())
    }
}
