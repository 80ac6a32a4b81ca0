//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use payflow::core_types::{ActorId, IntentToken};
use payflow::payment::{
    ApiError, CreateIntentRequest, DepositInstructions, IntentReceipt, IntentStatus, PaymentApi,
    PaymentIntentCoordinator, StatusReport,
};
use payflow::snapshot::{SessionSnapshotStore, SnapshotBackend};

/// In-memory payment server: scripted status answers, counted calls
pub struct FakePaymentServer {
    created: AtomicUsize,
    status_checks: AtomicUsize,
    statuses: Mutex<VecDeque<IntentStatus>>,
    idle_status: Mutex<IntentStatus>,
}

impl FakePaymentServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            status_checks: AtomicUsize::new(0),
            statuses: Mutex::new(VecDeque::new()),
            idle_status: Mutex::new(IntentStatus::AwaitingRail),
        })
    }

    /// Queue answers for upcoming status checks
    pub fn script(&self, statuses: &[IntentStatus]) {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    /// Answer once the script runs out
    pub fn set_idle_status(&self, status: IntentStatus) {
        *self.idle_status.lock().unwrap() = status;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentApi for FakePaymentServer {
    async fn create_intent(&self, req: &CreateIntentRequest) -> Result<IntentReceipt, ApiError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IntentReceipt {
            token: IntentToken::new(format!("srv_{}_{}", req.product_ref, n)),
            amount: req.amount,
            currency: req.currency,
            expires_at: None,
        })
    }

    async fn check_status(&self, _token: &IntentToken) -> Result<StatusReport, ApiError> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        let status = next.unwrap_or_else(|| *self.idle_status.lock().unwrap());
        Ok(StatusReport::new(status))
    }

    async fn deposit_instructions(
        &self,
        token: &IntentToken,
    ) -> Result<DepositInstructions, ApiError> {
        Ok(DepositInstructions {
            address: "UQ-fake-deposit".to_string(),
            memo: token.to_string(),
            network: None,
        })
    }

    async fn deduct_points(&self, _token: &IntentToken) -> Result<StatusReport, ApiError> {
        Ok(StatusReport::new(IntentStatus::Settled))
    }
}

pub fn coordinator(
    server: Arc<FakePaymentServer>,
    backend: Arc<dyn SnapshotBackend>,
) -> Arc<PaymentIntentCoordinator> {
    let store = Arc::new(SessionSnapshotStore::new(
        backend,
        server.clone(),
        Duration::from_secs(15),
    ));
    Arc::new(PaymentIntentCoordinator::new(
        server,
        store,
        ActorId::new("qa-user"),
        900,
    ))
}

/// Scratch directory under target/, removed on drop
pub struct TestDir(pub String);

impl TestDir {
    pub fn new(name: &str) -> Self {
        let dir = format!("target/test_{}_{}", name, std::process::id());
        let _ = std::fs::remove_dir_all(&dir);
        Self(dir)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
