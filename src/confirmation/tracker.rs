//! Per-token idempotent status application

use tracing::debug;

use crate::core_types::IntentToken;
use crate::payment::state::IntentStatus;
use crate::payment::types::ConfirmationEvent;

/// Last applied status for one subscription
#[derive(Debug, Clone)]
pub struct StatusTracker {
    token: IntentToken,
    last: Option<IntentStatus>,
}

impl StatusTracker {
    pub fn new(token: IntentToken) -> Self {
        Self { token, last: None }
    }

    pub fn last(&self) -> Option<IntentStatus> {
        self.last
    }

    /// A terminal status has been applied; nothing further is accepted
    pub fn is_closed(&self) -> bool {
        self.last.is_some_and(|s| s.is_terminal())
    }

    /// Apply `event` if it is for this token and strictly advances the last
    /// applied status. Returns whether it was applied.
    pub fn apply(&mut self, event: &ConfirmationEvent) -> bool {
        if event.token != self.token {
            debug!(expected = %self.token, got = %event.token, "Dropping event for other token");
            return false;
        }
        let advances = match self.last {
            None => true,
            Some(last) => event.status.advances(last),
        };
        if !advances {
            debug!(
                token = %self.token,
                status = %event.status,
                last = ?self.last,
                "Dropping stale or duplicate status"
            );
            return false;
        }
        self.last = Some(event.status);
        true
    }
}
