//! Payment Module
//!
//! Client-side payment intents and the rails that settle them.
//!
//! # Components
//!
//! - [`PaymentIntentCoordinator`]: idempotent create/resume per product reference
//! - [`rails`]: wallet transfer, exchange deposit, points deduction
//! - [`PaymentFlow`]: create → rail → confirmation, published to the UI
//! - [`PaymentApi`]: server calls, with [`HttpPaymentApi`] as the real client

pub mod api;
pub mod coordinator;
pub mod error;
pub mod flow;
pub mod rails;
pub mod state;
pub mod types;

pub use api::{ApiError, HttpPaymentApi, PaymentApi};
pub use coordinator::{FlowGuard, PaymentIntentCoordinator};
pub use error::PaymentError;
pub use flow::{FlowState, PaymentFlow, PaymentRequest};
pub use rails::{
    ExchangeDepositRail, PointsCurrencyRail, RailAdapter, TransferReceipt, WalletCapability,
    WalletError, WalletTransferRail,
};
pub use state::IntentStatus;
pub use types::{
    ConfirmationEvent, CreateIntentRequest, DepositInstructions, IntentReceipt, PaymentIntent,
    RailKind, RailOutcome, StatusReport,
};
