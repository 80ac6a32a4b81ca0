//! payflow - Client-side payment coordination
//!
//! Executes purchases across several settlement rails and keeps UI state
//! consistent with asynchronous, unreliable server confirmation. A separate
//! long-lived socket feeds the session's notification cache.
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Coordinator  │──▶│   Rail   │──▶│ Confirmation     │──▶│ Terminal │
//! │ (create/     │   │ (wallet/ │   │ (push SSE / poll)│   │ status,  │
//! │  resume)     │   │  deposit/│   └──────────────────┘   │ snapshot │
//! └──────┬───────┘   │  points) │                          │ cleared  │
//!        │           └──────────┘                          └──────────┘
//!        ▼
//! ┌──────────────┐
//! │  Snapshot    │  advisory, re-validated on every restore
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`core_types`] - Identifier newtypes (IntentToken, ProductRef, ...)
//! - [`money`] - Currency-tagged decimal amounts
//! - [`payment`] - Intent coordinator, rails, flow driver, API client
//! - [`confirmation`] - Push and poll confirmation channels
//! - [`snapshot`] - Durable session snapshots
//! - [`notification`] - Realtime notification socket and cache
//! - [`reconnect`] - Backoff policy and connection state machine
//! - [`task`] - Cancellable background tasks

// Core types - must be first!
pub mod core_types;

pub mod money;

pub mod confirmation;
pub mod notification;
pub mod payment;
pub mod reconnect;
pub mod snapshot;
pub mod task;

pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use confirmation::{ChannelEvent, ConfirmationChannel, PollChannel, PushChannel, Subscription};
pub use core_types::{ActorId, IntentToken, ProductRef, ProductType, SubjectId};
pub use money::{Amount, Currency, MoneyError};
pub use notification::{NotificationCache, RealtimeNotificationManager};
pub use payment::{
    IntentStatus, PaymentError, PaymentFlow, PaymentIntent, PaymentIntentCoordinator,
    PaymentRequest, RailAdapter, RailKind,
};
pub use reconnect::{BackoffPolicy, ConnectionState};
pub use snapshot::{SessionSnapshot, SessionSnapshotStore};
