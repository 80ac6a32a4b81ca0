//! Wallet Transfer Rail
//!
//! Pushes an on-chain transfer through an external wallet capability. The
//! transfer memo is the intent token so the server can match the funds.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::{RailAdapter, ensure_supported};
use crate::money::{Amount, Currency};
use crate::payment::error::PaymentError;
use crate::payment::types::{PaymentIntent, RailKind, RailOutcome};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet not connected")]
    NotConnected,
    #[error("User declined the transfer")]
    Declined,
    #[error("Wallet error: {0}")]
    Other(String),
}

/// Result of `submitTransfer` on the external wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub submitted: bool,
    pub tx_ref: Option<String>,
}

/// External wallet collaborator (consumed, never implemented here)
#[async_trait]
pub trait WalletCapability: Send + Sync {
    async fn submit_transfer(
        &self,
        amount: &Amount,
        memo: &str,
    ) -> Result<TransferReceipt, WalletError>;
}

pub struct WalletTransferRail {
    wallet: Arc<dyn WalletCapability>,
}

impl WalletTransferRail {
    pub fn new(wallet: Arc<dyn WalletCapability>) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl RailAdapter for WalletTransferRail {
    fn kind(&self) -> RailKind {
        RailKind::WalletTransfer
    }

    fn supports(&self, currency: Currency) -> bool {
        matches!(currency, Currency::Ton | Currency::Usdt)
    }

    async fn execute(&self, intent: &PaymentIntent) -> Result<RailOutcome, PaymentError> {
        ensure_supported(self, intent)?;

        let receipt = self
            .wallet
            .submit_transfer(&intent.amount, intent.token.as_str())
            .await
            .map_err(|e| {
                warn!(token = %intent.token, error = %e, "Wallet transfer failed");
                PaymentError::RailRejection {
                    rail: RailKind::WalletTransfer,
                    reason: e.to_string(),
                }
            })?;

        if !receipt.submitted {
            warn!(token = %intent.token, "Wallet returned without submitting");
            return Err(PaymentError::RailRejection {
                rail: RailKind::WalletTransfer,
                reason: "transfer was not submitted".to_string(),
            });
        }

        info!(token = %intent.token, tx_ref = ?receipt.tx_ref, "Wallet transfer submitted");
        Ok(RailOutcome::Submitted {
            tx_ref: receipt.tx_ref,
        })
    }
}
