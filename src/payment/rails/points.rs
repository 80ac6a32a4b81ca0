//! Points Currency Rail
//!
//! Synchronous deduction: the server resolves the intent in the same call,
//! so this is the only rail that never needs a confirmation channel.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{RailAdapter, ensure_supported};
use crate::money::Currency;
use crate::payment::api::PaymentApi;
use crate::payment::error::PaymentError;
use crate::payment::state::IntentStatus;
use crate::payment::types::{PaymentIntent, RailKind, RailOutcome};

pub struct PointsCurrencyRail {
    api: Arc<dyn PaymentApi>,
}

impl PointsCurrencyRail {
    pub fn new(api: Arc<dyn PaymentApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RailAdapter for PointsCurrencyRail {
    fn kind(&self) -> RailKind {
        RailKind::PointsCurrency
    }

    fn supports(&self, currency: Currency) -> bool {
        currency == Currency::Points
    }

    async fn execute(&self, intent: &PaymentIntent) -> Result<RailOutcome, PaymentError> {
        ensure_supported(self, intent)?;

        let report = self.api.deduct_points(&intent.token).await?;
        let status = match report.status {
            IntentStatus::Settled | IntentStatus::Failed => report.status,
            other => {
                // Deduction must resolve the intent; anything else is a server contract breach
                warn!(token = %intent.token, status = %other, "Points deduction did not resolve intent");
                return Err(PaymentError::Remote(format!(
                    "points deduction returned non-final status {}",
                    other
                )));
            }
        };

        info!(token = %intent.token, status = %status, "Points deduction resolved");
        Ok(RailOutcome::Resolved(status))
    }
}
