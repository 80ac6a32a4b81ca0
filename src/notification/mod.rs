//! Realtime Notifications
//!
//! Session-scoped socket feeding the notification cache. Independent from
//! the payment flow: it has its own connection FSM, keep-alive handling and
//! an outbound command queue that survives reconnects (but not restarts).

pub mod cache;
pub mod manager;
pub mod messages;
pub mod transport;

pub use cache::NotificationCache;
pub use manager::RealtimeNotificationManager;
pub use messages::{ClientCommand, NotificationItem, ServerMessage};
pub use transport::{InboundFrame, SocketConnection, SocketTransport, WsSocketTransport};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Notification session already running")]
    AlreadyConnected,
}
