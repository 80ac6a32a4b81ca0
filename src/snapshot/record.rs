//! Persisted session snapshot record
//!
//! One record per product reference. Records are advisory: they only let a
//! restarted client find a pending token, which is always re-validated
//! against the server before use.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{IntentToken, ProductRef, ProductType};
use crate::money::Amount;
use crate::payment::state::IntentStatus;
use crate::payment::types::{PaymentIntent, RailKind};

/// Current on-disk format version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Local record of an in-flight payment intent
///
/// Unknown fields are ignored on load so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default = "default_version")]
    pub format_version: u32,
    pub token: IntentToken,
    pub product_ref: ProductRef,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub product_type: Option<ProductType>,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub rail: Option<RailKind>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

impl SessionSnapshot {
    /// Snapshot of `intent`; the TTL runs from the intent's creation
    pub fn for_intent(intent: &PaymentIntent, ttl_seconds: u64) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            token: intent.token.clone(),
            product_ref: intent.product_ref.clone(),
            created_at: intent.created_at,
            ttl_seconds,
            product_type: Some(intent.product_type.clone()),
            amount: Some(intent.amount),
            rail: intent.rail,
            expires_at: intent.expires_at,
        }
    }

    /// TTL has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
        else {
            return false;
        };
        match self.created_at.checked_add_signed(ttl) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Rebuild an intent from the snapshot and a server-confirmed live status
    ///
    /// Returns `None` for records written without the intent details, which
    /// cannot be resumed.
    pub fn to_intent(&self, live_status: IntentStatus) -> Option<PaymentIntent> {
        Some(PaymentIntent {
            token: self.token.clone(),
            product_type: self.product_type.clone()?,
            product_ref: self.product_ref.clone(),
            amount: self.amount?,
            rail: self.rail,
            status: live_status,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}
