//! Session Snapshot Module
//!
//! Durable, advisory record of in-flight payment intents. It survives
//! process restarts so a pending transaction is never silently lost, but it
//! is never trusted: every restore re-validates the token with the server.

pub mod backend;
pub mod record;
pub mod store;

pub use backend::{FileSnapshotBackend, MemorySnapshotBackend, SnapshotBackend};
pub use record::{SNAPSHOT_FORMAT_VERSION, SessionSnapshot};
pub use store::SessionSnapshotStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
