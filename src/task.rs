//! Cancellable background tasks
//!
//! Every transport loop runs as a spawned task paired with a [`CancelToken`].
//! Cancellation is observed at each suspension point (connect, read, backoff
//! sleep, poll tick), and callbacks are gated on the token, so a task that
//! has been disposed can never mutate state after the fact.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared cancellation flag that can also be awaited
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Sender lives as long as any token clone, so this only ends on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a spawned cancellable task
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TaskHandle {
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `f` on the current runtime with a fresh cancel token
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let join = tokio::spawn(f(cancel.clone()));
        Self {
            cancel,
            join: Some(join),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Task has run to completion (or was aborted)
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Wait for the task to exit without cancelling it
    pub async fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Cancel and wait for the task to observe it
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
