//! Realtime Notification Manager
//!
//! One manager per session, constructed explicitly and passed by reference.
//! The socket lifecycle runs in a single background task driven by the
//! shared [`ConnectionMachine`]:
//!
//! - liveness checks (`ping`) are answered immediately with `pong`; a missed
//!   check never triggers a reconnect, only a close or error does
//! - commands issued while not connected wait in a FIFO outbox and are
//!   flushed in order once a connection opens
//! - errors and unclean closes reconnect with backoff, indefinitely under the
//!   default policy; a clean server close ends the session

use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::NotificationError;
use super::cache::NotificationCache;
use super::messages::{ClientCommand, ServerMessage};
use super::transport::{FrameSink, InboundFrame, SocketConnection, SocketTransport};
use crate::core_types::SubjectId;
use crate::reconnect::{
    BackoffPolicy, ConnEvent, ConnectionMachine, ConnectionState, DisconnectReason,
};
use crate::task::{CancelToken, TaskHandle};

/// Volatile FIFO of commands waiting for a live connection
#[derive(Default)]
struct Outbox {
    queue: Mutex<VecDeque<ClientCommand>>,
    notify: Notify,
}

impl Outbox {
    fn push(&self, command: ClientCommand) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(command);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<ClientCommand> {
        self.queue.lock().ok()?.pop_front()
    }

    /// Put back a command whose send failed, ahead of everything else
    fn requeue(&self, command: ClientCommand) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_front(command);
        }
    }

    fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[derive(Clone)]
struct Shared {
    cache: Arc<watch::Sender<NotificationCache>>,
    state: Arc<watch::Sender<ConnectionState>>,
    outbox: Arc<Outbox>,
}

pub struct RealtimeNotificationManager {
    transport: Arc<dyn SocketTransport>,
    policy: BackoffPolicy,
    shared: Shared,
    session: Mutex<Option<TaskHandle>>,
}

impl RealtimeNotificationManager {
    pub fn new(transport: Arc<dyn SocketTransport>, policy: BackoffPolicy) -> Self {
        Self::with_cache(transport, policy, NotificationCache::default())
    }

    pub fn with_cache(
        transport: Arc<dyn SocketTransport>,
        policy: BackoffPolicy,
        cache: NotificationCache,
    ) -> Self {
        let (cache, _) = watch::channel(cache);
        let (state, _) = watch::channel(ConnectionState::Disconnected(DisconnectReason::Idle));
        Self {
            transport,
            policy,
            shared: Shared {
                cache: Arc::new(cache),
                state: Arc::new(state),
                outbox: Arc::new(Outbox::default()),
            },
            session: Mutex::new(None),
        }
    }

    /// Start the session for `subject`
    ///
    /// # Errors
    /// `AlreadyConnected` while a previous session task is still running.
    pub fn connect(&self, subject: SubjectId) -> Result<(), NotificationError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| NotificationError::Transport("session lock poisoned".into()))?;
        if session.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(NotificationError::AlreadyConnected);
        }

        info!(subject = %subject, "Starting notification session");
        let transport = self.transport.clone();
        let policy = self.policy;
        let shared = self.shared.clone();
        *session = Some(TaskHandle::spawn(move |cancel| {
            run_session(transport, policy, subject, shared, cancel)
        }));
        Ok(())
    }

    /// Close the socket, cancel any pending retry and wait for the task to exit
    pub async fn disconnect(&self) {
        let handle = match self.session.lock() {
            Ok(mut session) => session.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("Notification session stopped");
        }
    }

    /// Mark everything about `subject` read: applied to the cache now, sent
    /// to the server as soon as a connection is available
    pub fn mark_read(&self, subject: SubjectId) {
        let mut marked = 0;
        self.shared.cache.send_modify(|cache| {
            marked = cache.mark_subject_read(&subject);
        });
        debug!(subject = %subject, marked, "Queued mark_read");
        self.shared
            .outbox
            .push(ClientCommand::MarkRead { subject_id: subject });
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn cache(&self) -> watch::Receiver<NotificationCache> {
        self.shared.cache.subscribe()
    }

    /// Commands waiting for a connection
    pub fn pending_commands(&self) -> usize {
        self.shared.outbox.len()
    }
}

enum SessionEnd {
    Cancelled,
    ServerClosed,
    Dropped,
}

fn step(machine: &mut ConnectionMachine, event: ConnEvent, shared: &Shared) -> bool {
    match machine.dispatch(event, Instant::now()) {
        Ok(state) => {
            shared.state.send_replace(*state);
            true
        }
        Err(e) => {
            error!(error = %e, "Notification state machine rejected event");
            false
        }
    }
}

async fn run_session(
    transport: Arc<dyn SocketTransport>,
    policy: BackoffPolicy,
    subject: SubjectId,
    shared: Shared,
    cancel: CancelToken,
) {
    let mut machine = ConnectionMachine::new(policy);
    if !step(&mut machine, ConnEvent::Connect, &shared) {
        return;
    }

    loop {
        let state = *machine.state();
        match state {
            ConnectionState::Connecting { attempt } => {
                let connected = tokio::select! {
                    _ = cancel.cancelled() => break,
                    connected = transport.connect(&subject) => connected,
                };
                let connection = match connected {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!(subject = %subject, attempt, error = %e, "Notification socket connect failed");
                        if !step(&mut machine, ConnEvent::Failed, &shared) {
                            break;
                        }
                        continue;
                    }
                };
                if !step(&mut machine, ConnEvent::Opened, &shared) {
                    break;
                }
                info!(subject = %subject, attempt, "Notification socket connected");

                match run_connection(connection, &mut machine, &shared, &cancel).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::ServerClosed => {
                        info!(subject = %subject, "Server closed notification socket");
                        step(&mut machine, ConnEvent::ServerClosed, &shared);
                    }
                    SessionEnd::Dropped => {
                        if !step(&mut machine, ConnEvent::Failed, &shared) {
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
                    subject = %subject,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Notification socket reconnect scheduled"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(next_retry_at) => {}
                }
                if !step(&mut machine, ConnEvent::RetryDue, &shared) {
                    break;
                }
            }
            ConnectionState::Disconnected(reason) => {
                if reason == DisconnectReason::GaveUp {
                    warn!(subject = %subject, failures = machine.failures(), "Notification socket gave up reconnecting");
                }
                break;
            }
            ConnectionState::Connected => break,
        }
    }

    if cancel.is_cancelled() {
        step(&mut machine, ConnEvent::Shutdown, &shared);
    }
    debug!(subject = %subject, state = %machine.state(), "Notification session task exiting");
}

/// Pump one open socket until it ends
///
/// The failure count is only reset once the server has sent a frame, so a
/// socket that opens and drops straight away keeps backing off.
async fn run_connection(
    connection: SocketConnection,
    machine: &mut ConnectionMachine,
    shared: &Shared,
    cancel: &CancelToken,
) -> SessionEnd {
    let SocketConnection {
        mut sink,
        mut stream,
    } = connection;
    let mut healthy = false;

    if let Err(e) = flush_outbox(&mut sink, &shared.outbox).await {
        warn!(error = %e, "Outbox flush failed");
        return SessionEnd::Dropped;
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return SessionEnd::Cancelled;
            }
            frame = stream.next() => match frame {
                Some(Ok(InboundFrame::Text(text))) => {
                    if !healthy {
                        healthy = step(machine, ConnEvent::Healthy, shared);
                    }
                    match ServerMessage::parse(&text) {
                        Ok(Some(ServerMessage::Ping)) => {
                            if let Err(e) = send_command(&mut sink, &ClientCommand::Pong).await {
                                warn!(error = %e, "Pong send failed");
                                return SessionEnd::Dropped;
                            }
                        }
                        Ok(Some(message)) => {
                            shared.cache.send_modify(|cache| cache.apply(&message));
                        }
                        Ok(None) => debug!("Ignoring unhandled notification message"),
                        Err(e) => warn!(error = %e, "Dropping malformed notification frame"),
                    }
                }
                Some(Ok(InboundFrame::Closed { clean: true })) => return SessionEnd::ServerClosed,
                Some(Ok(InboundFrame::Closed { clean: false })) => {
                    warn!("Notification socket closed abnormally");
                    return SessionEnd::Dropped;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Notification socket error");
                    return SessionEnd::Dropped;
                }
                None => {
                    warn!("Notification socket ended without close frame");
                    return SessionEnd::Dropped;
                }
            },
            _ = shared.outbox.notify.notified() => {
                if let Err(e) = flush_outbox(&mut sink, &shared.outbox).await {
                    warn!(error = %e, "Outbox flush failed");
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}

async fn send_command(sink: &mut FrameSink, command: &ClientCommand) -> Result<(), NotificationError> {
    sink.send(command.to_json()?).await
}

/// Send queued commands in order; a failed command goes back to the front
async fn flush_outbox(sink: &mut FrameSink, outbox: &Outbox) -> Result<(), NotificationError> {
    let mut sent = 0usize;
    while let Some(command) = outbox.pop() {
        if let Err(e) = send_command(sink, &command).await {
            outbox.requeue(command);
            return Err(e);
        }
        sent += 1;
    }
    if sent > 0 {
        debug!(sent, "Flushed queued notification commands");
    }
    Ok(())
}
