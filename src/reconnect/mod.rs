//! Reconnect primitives shared by the push channel and the notification socket

pub mod backoff;
pub mod state;

pub use backoff::BackoffPolicy;
pub use state::{ConnEvent, ConnectionMachine, ConnectionState, DisconnectReason, IllegalTransition};
