//! Push Channel
//!
//! Holds a server-push stream open for one token. Errors and closes before a
//! terminal status reconnect with exponential backoff; once the retry budget
//! is spent the subscriber gets `ConnectivityError` and the channel stops.
//! No replay is assumed across reconnects; duplicates that a server does
//! replay are dropped by the tracker.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::sse::SseDecoder;
use super::tracker::StatusTracker;
use super::{
    ChannelEvent, ConfirmationChannel, Emitter, EventCallback, Subscription, TransportError,
};
use crate::config::ApiConfig;
use crate::core_types::IntentToken;
use crate::payment::types::{ConfirmationEvent, StatusReport};
use crate::reconnect::{
    BackoffPolicy, ConnEvent, ConnectionMachine, ConnectionState, DisconnectReason,
};
use crate::task::{CancelToken, TaskHandle};

pub type EventStream = BoxStream<'static, Result<ConfirmationEvent, TransportError>>;

/// Opens a server-push stream scoped to one token
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, token: &IntentToken) -> Result<EventStream, TransportError>;
}

pub struct PushChannel {
    transport: Arc<dyn PushTransport>,
    policy: BackoffPolicy,
}

impl PushChannel {
    pub fn new(transport: Arc<dyn PushTransport>, policy: BackoffPolicy) -> Self {
        Self { transport, policy }
    }
}

impl ConfirmationChannel for PushChannel {
    fn subscribe(&self, token: IntentToken, on_event: EventCallback) -> Subscription {
        let transport = self.transport.clone();
        let policy = self.policy;
        Subscription::new(TaskHandle::spawn(move |cancel| {
            let emitter = Emitter::new(cancel.clone(), on_event);
            run_push(transport, policy, token, emitter, cancel)
        }))
    }
}

enum ReadEnd {
    Terminal,
    Cancelled,
    Dropped,
}

fn step(machine: &mut ConnectionMachine, event: ConnEvent, token: &IntentToken) -> bool {
    match machine.dispatch(event, Instant::now()) {
        Ok(_) => true,
        Err(e) => {
            error!(token = %token, error = %e, "Push channel state machine rejected event");
            false
        }
    }
}

async fn run_push(
    transport: Arc<dyn PushTransport>,
    policy: BackoffPolicy,
    token: IntentToken,
    mut emitter: Emitter,
    cancel: CancelToken,
) {
    let mut machine = ConnectionMachine::new(policy);
    let mut tracker = StatusTracker::new(token.clone());

    if !step(&mut machine, ConnEvent::Connect, &token) {
        return;
    }

    loop {
        let state = *machine.state();
        match state {
            ConnectionState::Connecting { attempt } => {
                debug!(token = %token, attempt, "Opening push stream");
                let opened = tokio::select! {
                    _ = cancel.cancelled() => break,
                    opened = transport.open(&token) => opened,
                };
                let mut stream = match opened {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(token = %token, attempt, error = %e, "Push stream connect failed");
                        if !step(&mut machine, ConnEvent::Failed, &token) {
                            break;
                        }
                        continue;
                    }
                };
                if !step(&mut machine, ConnEvent::Opened, &token) {
                    break;
                }
                info!(token = %token, attempt, "Push stream connected");

                let end = loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break ReadEnd::Cancelled,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => {
                            step(&mut machine, ConnEvent::Healthy, &token);
                            if tracker.apply(&event) {
                                emitter.emit(ChannelEvent::Status(event));
                                if tracker.is_closed() {
                                    break ReadEnd::Terminal;
                                }
                            }
                        }
                        Some(Err(TransportError::Decode(e))) => {
                            warn!(token = %token, error = %e, "Skipping undecodable push frame");
                        }
                        Some(Err(e)) => {
                            warn!(token = %token, error = %e, "Push stream error");
                            break ReadEnd::Dropped;
                        }
                        None => {
                            debug!(token = %token, "Push stream closed before terminal status");
                            break ReadEnd::Dropped;
                        }
                    }
                };

                match end {
                    ReadEnd::Terminal => {
                        info!(token = %token, status = ?tracker.last(), "Push channel reached terminal status");
                        break;
                    }
                    ReadEnd::Cancelled => break,
                    ReadEnd::Dropped => {
                        if !step(&mut machine, ConnEvent::Failed, &token) {
                            break;
                        }
                    }
                }
            }
            ConnectionState::Backoff {
                attempt,
                next_retry_at,
            } => {
                let delay = next_retry_at.saturating_duration_since(Instant::now());
                info!(
                    token = %token,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Push stream reconnect scheduled"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(next_retry_at) => {}
                }
                if !step(&mut machine, ConnEvent::RetryDue, &token) {
                    break;
                }
            }
            ConnectionState::Disconnected(DisconnectReason::GaveUp) => {
                let attempts = machine.failures().saturating_sub(1);
                warn!(token = %token, attempts, "Push channel gave up reconnecting");
                emitter.emit(ChannelEvent::ConnectivityError { attempts });
                break;
            }
            ConnectionState::Connected | ConnectionState::Disconnected(_) => break,
        }
    }

    let _ = machine.dispatch(ConnEvent::Shutdown, Instant::now());
    debug!(token = %token, "Push channel stopped");
}

// ============================================================
// SSE transport
// ============================================================

/// `text/event-stream` transport at `{base_url}/payments/intents/{token}/events`
pub struct SsePushTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SsePushTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, TransportError> {
        // No total timeout: the stream is long-lived
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::Connect(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn events_url(&self, token: &IntentToken) -> String {
        format!("{}/payments/intents/{}/events", self.base_url, token)
    }
}

fn decode_frame(data: &str, token: &IntentToken) -> Result<ConfirmationEvent, TransportError> {
    serde_json::from_str::<StatusReport>(data)
        .map(|report| report.into_event(token.clone()))
        .map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl PushTransport for SsePushTransport {
    async fn open(&self, token: &IntentToken) -> Result<EventStream, TransportError> {
        let request_id = uuid::Uuid::new_v4();
        let response = self
            .client
            .get(self.events_url(token))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header("x-request-id", request_id.to_string())
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connect(format!("HTTP {}", status.as_u16())));
        }
        debug!(%request_id, token = %token, "SSE stream open");

        let token = token.clone();
        let mut decoder = SseDecoder::new();
        let stream = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder
                    .feed(&bytes)
                    .iter()
                    .map(|data| decode_frame(data, &token))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(TransportError::Stream(e.to_string()))],
            })
            .flat_map(futures::stream::iter)
            .boxed();
        Ok(stream)
    }
}
