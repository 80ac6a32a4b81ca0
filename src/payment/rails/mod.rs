//! Settlement Rails
//!
//! Each rail executes one settlement path for an intent that is
//! `AWAITING_RAIL`. A rail failure is terminal for the attempt only: the
//! intent and its snapshot stay alive so the user can retry.

pub mod exchange;
pub mod points;
pub mod wallet;

pub use exchange::ExchangeDepositRail;
pub use points::PointsCurrencyRail;
pub use wallet::{TransferReceipt, WalletCapability, WalletError, WalletTransferRail};

use async_trait::async_trait;

use super::error::PaymentError;
use super::types::{PaymentIntent, RailKind, RailOutcome};
use crate::money::Currency;

/// Settlement rail contract
#[async_trait]
pub trait RailAdapter: Send + Sync {
    fn kind(&self) -> RailKind;

    /// Currencies this rail can settle
    fn supports(&self, currency: Currency) -> bool;

    /// Execute the rail for `intent`
    ///
    /// Returns once the rail's own step is done: "submitted" for wallet
    /// transfers, instructions for deposits, the final status for points.
    async fn execute(&self, intent: &PaymentIntent) -> Result<RailOutcome, PaymentError>;
}

/// Reject intents a rail cannot settle before touching any external system
pub(crate) fn ensure_supported(
    rail: &dyn RailAdapter,
    intent: &PaymentIntent,
) -> Result<(), PaymentError> {
    if rail.supports(intent.currency()) {
        Ok(())
    } else {
        Err(PaymentError::Validation(format!(
            "{} cannot settle {}",
            rail.kind(),
            intent.currency()
        )))
    }
}
