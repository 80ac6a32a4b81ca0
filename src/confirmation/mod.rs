//! Confirmation Channels
//!
//! A channel observes one token until it reaches a terminal status. Events
//! are forwarded through a callback only after passing the token's
//! [`StatusTracker`], so subscribers see a strictly advancing sequence no
//! matter how the transport delivers them.
//!
//! Transport failures surface through the same callback as
//! [`ChannelEvent::ConnectivityError`].

pub mod poll;
pub mod push;
pub mod sse;
pub mod tracker;

pub use poll::PollChannel;
pub use push::{EventStream, PushChannel, PushTransport, SsePushTransport};
pub use tracker::StatusTracker;

use thiserror::Error;

use crate::core_types::IntentToken;
use crate::payment::types::ConfirmationEvent;
use crate::task::{CancelToken, TaskHandle};

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// An applied (strictly advancing) status
    Status(ConfirmationEvent),
    /// Reconnects exhausted; the subscription is closed and the caller
    /// should perform one explicit status check
    ConnectivityError { attempts: u32 },
}

pub type EventCallback = Box<dyn FnMut(ChannelEvent) + Send>;

/// Push-transport failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Stream error: {0}")]
    Stream(String),

    /// A single frame could not be decoded; the connection is still usable
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Observes a token until terminal
pub trait ConfirmationChannel: Send + Sync {
    fn subscribe(&self, token: IntentToken, on_event: EventCallback) -> Subscription;
}

/// Live subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    handle: TaskHandle,
}

impl Subscription {
    pub(crate) fn new(handle: TaskHandle) -> Self {
        Self { handle }
    }

    /// Close the transport and cancel any pending timer
    pub fn unsubscribe(self) {
        self.handle.cancel();
    }

    /// Channel has stopped (terminal status, give-up or unsubscribe)
    pub fn is_closed(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait until the channel stops on its own
    pub async fn closed(self) {
        self.handle.join().await;
    }
}

/// Callback wrapper that goes silent once the subscription is cancelled
pub(crate) struct Emitter {
    cancel: CancelToken,
    on_event: EventCallback,
}

impl Emitter {
    pub(crate) fn new(cancel: CancelToken, on_event: EventCallback) -> Self {
        Self { cancel, on_event }
    }

    /// Deliver `event` unless the subscription was cancelled; returns whether it was delivered
    pub(crate) fn emit(&mut self, event: ChannelEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        (self.on_event)(event);
        true
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Callback that records everything it receives
    pub fn collector() -> (EventCallback, Arc<Mutex<Vec<ChannelEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: EventCallback = Box::new(move |event| sink.lock().unwrap().push(event));
        (callback, events)
    }

    pub fn statuses(events: &Mutex<Vec<ChannelEvent>>) -> Vec<crate::payment::state::IntentStatus> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::Status(event) => Some(event.status),
                ChannelEvent::ConnectivityError { .. } => None,
            })
            .collect()
    }
}
