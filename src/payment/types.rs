//! Payment Core Types
//!
//! Wire types for the payment API and the in-memory intent record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::IntentStatus;
use crate::core_types::{ActorId, IntentToken, ProductRef, ProductType};
use crate::money::{Amount, Currency};

/// Settlement rail identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailKind {
    /// On-chain transfer pushed through the user's wallet
    WalletTransfer,
    /// Manual transfer from an exchange account to a deposit address
    ExchangeDeposit,
    /// Synchronous deduction from the platform points balance
    PointsCurrency,
}

impl RailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailKind::WalletTransfer => "WALLET_TRANSFER",
            RailKind::ExchangeDeposit => "EXCHANGE_DEPOSIT",
            RailKind::PointsCurrency => "POINTS_CURRENCY",
        }
    }
}

impl fmt::Display for RailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RailKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "wallet" | "wallet_transfer" => Ok(RailKind::WalletTransfer),
            "exchange" | "exchange_deposit" => Ok(RailKind::ExchangeDeposit),
            "points" | "points_currency" => Ok(RailKind::PointsCurrency),
            other => Err(format!("unknown rail: {}", other)),
        }
    }
}

/// Client-side record of a payment intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub token: IntentToken,
    pub product_type: ProductType,
    pub product_ref: ProductRef,
    pub amount: Amount,
    /// Rail chosen for the current attempt, `None` until a rail executes
    pub rail: Option<RailKind>,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    /// Apply `status` if it advances the intent; returns whether it was applied
    pub fn advance(&mut self, status: IntentStatus) -> bool {
        if status.advances(self.status) {
            self.status = status;
            true
        } else {
            false
        }
    }

    /// Server-side expiry has passed
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl fmt::Display for PaymentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Intent[{}] {}/{} amount={} state={}",
            self.token, self.product_type, self.product_ref, self.amount, self.status
        )
    }
}

/// Body of the create-intent call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub product_type: ProductType,
    pub product_ref: ProductRef,
    pub amount: rust_decimal::Decimal,
    pub currency: Currency,
    pub actor_id: ActorId,
}

/// Successful create-intent response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentReceipt {
    pub token: IntentToken,
    pub amount: rust_decimal::Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Live status of a token as reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: IntentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl StatusReport {
    pub fn new(status: IntentStatus) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn into_event(self, token: IntentToken) -> ConfirmationEvent {
        ConfirmationEvent {
            token,
            status: self.status,
            payload: self.payload,
        }
    }
}

/// A status observation for one token
///
/// Delivered at-least-once and possibly out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationEvent {
    pub token: IntentToken,
    pub status: IntentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Deposit target for manual exchange transfers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInstructions {
    pub address: String,
    /// Memo/comment the user must attach so the server can match the deposit
    pub memo: String,
    #[serde(default)]
    pub network: Option<String>,
}

/// Result of a successful rail execution
#[derive(Debug, Clone, PartialEq)]
pub enum RailOutcome {
    /// Wallet accepted the transfer; settlement still needs confirmation
    Submitted { tx_ref: Option<String> },
    /// User must move funds manually; settlement needs confirmation
    AwaitingDeposit(DepositInstructions),
    /// Rail settled the intent itself (points deduction)
    Resolved(IntentStatus),
}

impl RailOutcome {
    /// Status the intent moves to once this outcome is recorded
    pub fn resulting_status(&self) -> IntentStatus {
        match self {
            RailOutcome::Submitted { .. } | RailOutcome::AwaitingDeposit(_) => {
                IntentStatus::AwaitingConfirmation
            }
            RailOutcome::Resolved(status) => *status,
        }
    }
}
