//! Poll Channel
//!
//! Polls the status endpoint on a fixed interval until a terminal status or
//! the overall deadline. Each poll is individually bounded; a failed poll is
//! logged and the next tick tries again. Reaching the deadline reports
//! `Expired`.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::tracker::StatusTracker;
use super::{ChannelEvent, ConfirmationChannel, Emitter, EventCallback, Subscription};
use crate::config::PollConfig;
use crate::core_types::IntentToken;
use crate::payment::api::PaymentApi;
use crate::payment::state::IntentStatus;
use crate::payment::types::ConfirmationEvent;
use crate::task::{CancelToken, TaskHandle};

#[derive(Debug, Clone, Copy)]
struct PollTiming {
    interval: Duration,
    timeout: Duration,
    request_timeout: Duration,
}

pub struct PollChannel {
    api: Arc<dyn PaymentApi>,
    timing: PollTiming,
}

impl PollChannel {
    pub fn new(api: Arc<dyn PaymentApi>, config: &PollConfig) -> Self {
        Self::with_timing(
            api,
            Duration::from_millis(config.interval_ms),
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn with_timing(
        api: Arc<dyn PaymentApi>,
        interval: Duration,
        timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api,
            timing: PollTiming {
                interval,
                timeout,
                request_timeout,
            },
        }
    }
}

impl ConfirmationChannel for PollChannel {
    fn subscribe(&self, token: IntentToken, on_event: EventCallback) -> Subscription {
        let api = self.api.clone();
        let timing = self.timing;
        Subscription::new(TaskHandle::spawn(move |cancel| {
            let emitter = Emitter::new(cancel.clone(), on_event);
            run_poll(api, timing, token, emitter, cancel)
        }))
    }
}

async fn run_poll(
    api: Arc<dyn PaymentApi>,
    timing: PollTiming,
    token: IntentToken,
    mut emitter: Emitter,
    cancel: CancelToken,
) {
    let start = Instant::now();
    let deadline = start + timing.timeout;
    let mut ticker = tokio::time::interval_at(start + timing.interval, timing.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = StatusTracker::new(token.clone());
    let mut polls: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(token = %token, polls, "Poll channel cancelled");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                expire(&mut tracker, &mut emitter, &token, polls, timing.timeout);
                return;
            }
            _ = ticker.tick() => {}
        }

        polls += 1;
        // The deadline also cuts short a request still in flight
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {
                expire(&mut tracker, &mut emitter, &token, polls, timing.timeout);
                return;
            }
            result = tokio::time::timeout(timing.request_timeout, api.check_status(&token)) => result,
        };

        match result {
            Ok(Ok(report)) => {
                debug!(token = %token, polls, status = %report.status, "Poll result");
                let event = report.into_event(token.clone());
                if tracker.apply(&event) {
                    emitter.emit(ChannelEvent::Status(event));
                }
                if tracker.is_closed() {
                    info!(token = %token, polls, status = ?tracker.last(), "Poll channel reached terminal status");
                    return;
                }
            }
            Ok(Err(e)) => {
                warn!(token = %token, polls, error = %e, "Status poll failed");
            }
            Err(_) => {
                warn!(
                    token = %token,
                    polls,
                    timeout_ms = timing.request_timeout.as_millis() as u64,
                    "Status poll timed out"
                );
            }
        }
    }
}

fn expire(
    tracker: &mut StatusTracker,
    emitter: &mut Emitter,
    token: &IntentToken,
    polls: u32,
    timeout: Duration,
) {
    info!(
        token = %token,
        polls,
        timeout_ms = timeout.as_millis() as u64,
        "No terminal status before poll deadline"
    );
    let expired = ConfirmationEvent {
        token: token.clone(),
        status: IntentStatus::Expired,
        payload: None,
    };
    if tracker.apply(&expired) {
        emitter.emit(ChannelEvent::Status(expired));
    }
}
