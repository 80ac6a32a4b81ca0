//! Connection lifecycle state machine
//!
//! One explicit FSM drives every long-lived transport. All transitions go
//! through [`ConnectionMachine::dispatch`]; anything not listed there is
//! rejected with [`IllegalTransition`] and leaves the state untouched.
//!
//! ```text
//! Disconnected --Connect--> Connecting --Opened--> Connected
//!                              |                      |
//!                            Failed               Failed / ServerClosed
//!                              v                      v
//!           Connecting <--RetryDue-- Backoff     Backoff / Disconnected(ServerClosed)
//!
//! any --Shutdown--> Disconnected(Shutdown)
//! Failed with budget exhausted --> Disconnected(GaveUp)
//! ```

use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

use super::backoff::BackoffPolicy;

/// Why a connection is not live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Never connected
    Idle,
    /// Server closed cleanly; no automatic reconnect
    ServerClosed,
    /// Local shutdown requested
    Shutdown,
    /// Retry budget exhausted
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected(DisconnectReason),
    Connecting { attempt: u32 },
    Connected,
    Backoff { attempt: u32, next_retry_at: Instant },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(_) => "DISCONNECTED",
            ConnectionState::Connecting { .. } => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Backoff { .. } => "BACKOFF",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "DISCONNECTED({:?})", reason),
            ConnectionState::Connecting { attempt } => write!(f, "CONNECTING(attempt={})", attempt),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Backoff { attempt, .. } => write!(f, "BACKOFF(attempt={})", attempt),
        }
    }
}

/// Inputs to the connection FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// Caller asks for a connection
    Connect,
    /// Transport handshake completed
    Opened,
    /// Connection proved useful (first message applied); resets the retry budget
    Healthy,
    /// Connect attempt or live connection failed
    Failed,
    /// Server closed the connection cleanly
    ServerClosed,
    /// Backoff delay elapsed
    RetryDue,
    /// Local teardown
    Shutdown,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal transition: {event:?} in state {state}")]
pub struct IllegalTransition {
    pub state: ConnectionState,
    pub event: ConnEvent,
}

/// Connection FSM plus the failure counter the backoff policy reads
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: BackoffPolicy,
    failures: u32,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected(DisconnectReason::Idle),
            policy,
            failures: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Consecutive failures since the last healthy connection
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Apply `event` at time `now`
    pub fn dispatch(
        &mut self,
        event: ConnEvent,
        now: Instant,
    ) -> Result<&ConnectionState, IllegalTransition> {
        use ConnEvent as E;
        use ConnectionState as S;

        let next = match (self.state, event) {
            (_, E::Shutdown) => S::Disconnected(DisconnectReason::Shutdown),

            (S::Disconnected(_), E::Connect) => {
                self.failures = 0;
                S::Connecting { attempt: 1 }
            }

            (S::Connecting { .. }, E::Opened) => S::Connected,

            (S::Connected, E::Healthy) => {
                self.failures = 0;
                S::Connected
            }

            (S::Connecting { .. } | S::Connected, E::Failed) => {
                self.failures = self.failures.saturating_add(1);
                if self.policy.is_exhausted(self.failures) {
                    S::Disconnected(DisconnectReason::GaveUp)
                } else {
                    S::Backoff {
                        attempt: self.failures,
                        next_retry_at: now + self.policy.delay_for(self.failures),
                    }
                }
            }

            (S::Connected, E::ServerClosed) => S::Disconnected(DisconnectReason::ServerClosed),

            (S::Backoff { attempt, .. }, E::RetryDue) => S::Connecting {
                attempt: attempt + 1,
            },

            (state, event) => return Err(IllegalTransition { state, event }),
        };

        self.state = next;
        Ok(&self.state)
    }
}
