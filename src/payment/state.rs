//! Payment Intent Status
//!
//! Statuses are totally ordered by progress. Confirmation events arrive
//! at-least-once and possibly out of order, so a status is only ever applied
//! when it is strictly more advanced than the last applied one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Payment intent lifecycle status
///
/// ```text
/// CREATED → AWAITING_RAIL → AWAITING_CONFIRMATION → SETTLED
///                                                 → FAILED
///                                                 → EXPIRED
/// ```
/// Terminal states: SETTLED, FAILED, EXPIRED (all share the top rank)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Server issued the token
    Created,
    /// Snapshot written, waiting for the user to pick/execute a rail
    AwaitingRail,
    /// Rail executed (or deposit instructions shown); waiting on the server
    AwaitingConfirmation,
    /// Terminal: funds received
    Settled,
    /// Terminal: server rejected the payment
    Failed,
    /// Terminal: no confirmation within the allowed window
    Expired,
}

impl IntentStatus {
    /// Progress rank used for idempotent application
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            IntentStatus::Created => 0,
            IntentStatus::AwaitingRail => 1,
            IntentStatus::AwaitingConfirmation => 2,
            IntentStatus::Settled | IntentStatus::Failed | IntentStatus::Expired => 3,
        }
    }

    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// True if `self` may replace `current`
    #[inline]
    pub fn advances(&self, current: IntentStatus) -> bool {
        self.rank() > current.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "CREATED",
            IntentStatus::AwaitingRail => "AWAITING_RAIL",
            IntentStatus::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            IntentStatus::Settled => "SETTLED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(IntentStatus::Created),
            "AWAITING_RAIL" => Ok(IntentStatus::AwaitingRail),
            "AWAITING_CONFIRMATION" => Ok(IntentStatus::AwaitingConfirmation),
            "SETTLED" => Ok(IntentStatus::Settled),
            "FAILED" => Ok(IntentStatus::Failed),
            "EXPIRED" => Ok(IntentStatus::Expired),
            other => Err(format!("unknown intent status: {}", other)),
        }
    }
}
