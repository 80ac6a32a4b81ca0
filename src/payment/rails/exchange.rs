//! Exchange Deposit Rail
//!
//! No submit step: the user moves funds manually from an exchange account.
//! The rail only fetches the deposit address/memo pair to show.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{RailAdapter, ensure_supported};
use crate::money::Currency;
use crate::payment::api::PaymentApi;
use crate::payment::error::PaymentError;
use crate::payment::types::{PaymentIntent, RailKind, RailOutcome};

pub struct ExchangeDepositRail {
    api: Arc<dyn PaymentApi>,
}

impl ExchangeDepositRail {
    pub fn new(api: Arc<dyn PaymentApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RailAdapter for ExchangeDepositRail {
    fn kind(&self) -> RailKind {
        RailKind::ExchangeDeposit
    }

    fn supports(&self, currency: Currency) -> bool {
        matches!(currency, Currency::Usdt | Currency::Usdc | Currency::Ton)
    }

    async fn execute(&self, intent: &PaymentIntent) -> Result<RailOutcome, PaymentError> {
        ensure_supported(self, intent)?;

        let instructions = self.api.deposit_instructions(&intent.token).await?;
        info!(
            token = %intent.token,
            address = %instructions.address,
            "Deposit instructions ready"
        );
        Ok(RailOutcome::AwaitingDeposit(instructions))
    }
}
