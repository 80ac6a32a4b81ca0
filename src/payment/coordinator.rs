//! Payment Intent Coordinator
//!
//! Owns the intent lifecycle on the client. At most one non-terminal intent
//! exists per product reference: `create()` for a reference that already has
//! one returns it instead of minting a new token.
//!
//! Lookup order for an existing intent:
//! 1. the in-process active map (every transition in this process goes
//!    through [`PaymentIntentCoordinator::record_status`])
//! 2. the session snapshot, re-validated against the server
//!
//! Creation for one reference is serialized by an async lock so concurrent
//! double-submits perform a single server call. A whole purchase flow is
//! guarded separately by [`FlowGuard`]: a second flow for a reference that
//! is already running is refused, so a rail never executes twice.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::api::PaymentApi;
use super::error::PaymentError;
use super::state::IntentStatus;
use super::types::{CreateIntentRequest, PaymentIntent, RailKind, RailOutcome};
use crate::core_types::{ActorId, IntentToken, ProductRef, ProductType};
use crate::money::{Amount, Currency};
use crate::snapshot::{SessionSnapshot, SessionSnapshotStore};

pub struct PaymentIntentCoordinator {
    api: Arc<dyn PaymentApi>,
    snapshots: Arc<SessionSnapshotStore>,
    active: DashMap<ProductRef, PaymentIntent>,
    create_locks: DashMap<ProductRef, Arc<Mutex<()>>>,
    flow_locks: DashMap<ProductRef, Arc<Mutex<()>>>,
    actor_id: ActorId,
    snapshot_ttl_seconds: u64,
}

/// Exclusive right to drive the purchase flow for one product reference
///
/// Obtained from [`PaymentIntentCoordinator::begin_flow`] and handed back
/// through [`PaymentIntentCoordinator::end_flow`].
pub struct FlowGuard {
    product_ref: ProductRef,
    _held: OwnedMutexGuard<()>,
}

impl FlowGuard {
    pub fn product_ref(&self) -> &ProductRef {
        &self.product_ref
    }
}

impl PaymentIntentCoordinator {
    pub fn new(
        api: Arc<dyn PaymentApi>,
        snapshots: Arc<SessionSnapshotStore>,
        actor_id: ActorId,
        snapshot_ttl_seconds: u64,
    ) -> Self {
        Self {
            api,
            snapshots,
            active: DashMap::new(),
            create_locks: DashMap::new(),
            flow_locks: DashMap::new(),
            actor_id,
            snapshot_ttl_seconds,
        }
    }

    /// Create or resume the intent for `product_ref`
    ///
    /// # Errors
    /// - `Validation`: unsupported currency, bad amount, empty reference, or
    ///   the server rejected the request. Never retried.
    /// - `Remote`: network/5xx failure of the create call or of snapshot
    ///   revalidation. Surfaced for a manual retry; creation is never
    ///   retried automatically.
    pub async fn create(
        &self,
        product_type: ProductType,
        product_ref: ProductRef,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let currency: Currency = currency.parse()?;
        let amount = Amount::new(amount, currency)?;
        if product_ref.as_str().trim().is_empty() {
            return Err(PaymentError::Validation("product reference is empty".into()));
        }
        if product_type.as_str().trim().is_empty() {
            return Err(PaymentError::Validation("product type is empty".into()));
        }

        let lock = self
            .create_locks
            .entry(product_ref.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = self.reuse_active(&product_ref, &amount)? {
            return Ok(existing);
        }

        if let Some(restored) = self.snapshots.restore(&product_ref).await? {
            warn_on_amount_change(&restored, &amount);
            self.active.insert(product_ref.clone(), restored.clone());
            return Ok(restored);
        }

        let request = CreateIntentRequest {
            product_type: product_type.clone(),
            product_ref: product_ref.clone(),
            amount: amount.value(),
            currency,
            actor_id: self.actor_id.clone(),
        };
        let receipt = self.api.create_intent(&request).await.map_err(|e| {
            warn!(product_ref = %product_ref, error = %e, "Create intent failed");
            PaymentError::from(e)
        })?;

        if receipt.amount != amount.value() || receipt.currency != currency {
            warn!(
                token = %receipt.token,
                requested = %amount,
                server_amount = %receipt.amount,
                server_currency = %receipt.currency,
                "Server echoed a different amount"
            );
        }

        let mut intent = PaymentIntent {
            token: receipt.token,
            product_type,
            product_ref: product_ref.clone(),
            amount,
            rail: None,
            status: IntentStatus::Created,
            created_at: Utc::now(),
            expires_at: receipt.expires_at,
        };
        intent.advance(IntentStatus::AwaitingRail);

        // The active map still guards this process if the write fails
        if let Err(e) = self
            .snapshots
            .save(&SessionSnapshot::for_intent(&intent, self.snapshot_ttl_seconds))
        {
            error!(token = %intent.token, error = %e, "Failed to persist session snapshot");
        }
        self.active.insert(product_ref, intent.clone());

        info!(
            token = %intent.token,
            product_ref = %intent.product_ref,
            amount = %intent.amount,
            "Payment intent created"
        );
        Ok(intent)
    }

    /// Non-terminal intent already held by this process, if any
    fn reuse_active(
        &self,
        product_ref: &ProductRef,
        amount: &Amount,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        let Some(existing) = self.active.get(product_ref).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        if existing.is_past_expiry(Utc::now()) {
            info!(token = %existing.token, "Active intent past server expiry, discarding");
            self.record_status(product_ref, IntentStatus::Expired)?;
            return Ok(None);
        }

        warn_on_amount_change(&existing, amount);
        debug!(token = %existing.token, product_ref = %product_ref, "Reusing active intent");
        Ok(Some(existing))
    }

    /// Attach the rail that ran and apply the status its outcome implies
    pub fn apply_rail_outcome(
        &self,
        product_ref: &ProductRef,
        rail: RailKind,
        outcome: &RailOutcome,
    ) -> Result<PaymentIntent, PaymentError> {
        {
            let mut entry = self
                .active
                .get_mut(product_ref)
                .ok_or_else(|| PaymentError::NoActiveIntent(product_ref.to_string()))?;
            entry.rail = Some(rail);
        }

        let intent = self.record_status(product_ref, outcome.resulting_status())?;
        if !intent.status.is_terminal() {
            // Keep the rail in the snapshot so a reload resumes observation
            if let Err(e) = self
                .snapshots
                .save(&SessionSnapshot::for_intent(&intent, self.snapshot_ttl_seconds))
            {
                error!(token = %intent.token, error = %e, "Failed to update session snapshot");
            }
        }
        Ok(intent)
    }

    /// Apply `status` if it advances the active intent for `product_ref`
    ///
    /// Stale or duplicate statuses are ignored. A terminal status removes the
    /// intent from the active set and clears its snapshot.
    pub fn record_status(
        &self,
        product_ref: &ProductRef,
        status: IntentStatus,
    ) -> Result<PaymentIntent, PaymentError> {
        let (intent, applied) = {
            let mut entry = self
                .active
                .get_mut(product_ref)
                .ok_or_else(|| PaymentError::NoActiveIntent(product_ref.to_string()))?;
            let applied = entry.advance(status);
            (entry.clone(), applied)
        };

        if !applied {
            debug!(token = %intent.token, status = %status, current = %intent.status, "Ignoring non-advancing status");
            return Ok(intent);
        }
        info!(token = %intent.token, product_ref = %product_ref, status = %intent.status, "Intent status changed");

        if intent.status.is_terminal() {
            self.active.remove(product_ref);
            // The server already holds the outcome; a stale snapshot is
            // discarded on the next restore.
            if let Err(e) = self.snapshots.clear(product_ref) {
                error!(token = %intent.token, product_ref = %product_ref, error = %e, "Failed to clear snapshot of finished intent");
            }
            self.prune_locks(product_ref);
        }
        Ok(intent)
    }

    /// One explicit status check for `token`
    ///
    /// Used after a `ConnectivityError`. If the token belongs to an active
    /// intent the result is recorded like any other status.
    pub async fn check_status(&self, token: &IntentToken) -> Result<IntentStatus, PaymentError> {
        let report = self.api.check_status(token).await?;
        let product_ref = self
            .active
            .iter()
            .find(|entry| entry.value().token == *token)
            .map(|entry| entry.key().clone());

        match product_ref {
            Some(product_ref) => Ok(self.record_status(&product_ref, report.status)?.status),
            None => Ok(report.status),
        }
    }

    /// Explicit user abandonment: forget the intent and clear its snapshot
    pub fn abandon(&self, product_ref: &ProductRef) -> Result<Option<PaymentIntent>, PaymentError> {
        let removed = self.active.remove(product_ref).map(|(_, intent)| intent);
        self.prune_locks(product_ref);
        self.snapshots.clear(product_ref)?;
        if let Some(intent) = &removed {
            info!(token = %intent.token, product_ref = %product_ref, "Payment intent abandoned");
        }
        Ok(removed)
    }

    /// Current non-terminal intent for `product_ref`
    pub fn active(&self, product_ref: &ProductRef) -> Option<PaymentIntent> {
        self.active.get(product_ref).map(|e| e.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Claim the purchase flow for `product_ref`
    ///
    /// # Errors
    /// `FlowInProgress` when another flow for the same reference holds it.
    pub fn begin_flow(&self, product_ref: &ProductRef) -> Result<FlowGuard, PaymentError> {
        let lock = self
            .flow_locks
            .entry(product_ref.clone())
            .or_default()
            .clone();
        let held = lock
            .try_lock_owned()
            .map_err(|_| PaymentError::FlowInProgress(product_ref.to_string()))?;
        Ok(FlowGuard {
            product_ref: product_ref.clone(),
            _held: held,
        })
    }

    /// Release a guard taken by [`Self::begin_flow`]
    pub fn end_flow(&self, guard: FlowGuard) {
        let product_ref = guard.product_ref.clone();
        drop(guard);
        self.prune_locks(&product_ref);
    }

    /// Drop per-reference locks nobody is holding or waiting on
    fn prune_locks(&self, product_ref: &ProductRef) {
        self.create_locks
            .remove_if(product_ref, |_, lock| Arc::strong_count(lock) == 1);
        self.flow_locks
            .remove_if(product_ref, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn warn_on_amount_change(existing: &PaymentIntent, requested: &Amount) {
    if existing.amount != *requested {
        warn!(
            token = %existing.token,
            existing = %existing.amount,
            requested = %requested,
            "Reusing pending intent with a different amount"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::api::ApiError;
    use crate::payment::api::mock::MockPaymentApi;
    use crate::payment::types::{DepositInstructions, StatusReport};
    use crate::snapshot::{MemorySnapshotBackend, SnapshotBackend, SnapshotError};
    use std::time::Duration;

    struct Harness {
        coordinator: Arc<PaymentIntentCoordinator>,
        api: Arc<MockPaymentApi>,
        backend: Arc<MemorySnapshotBackend>,
    }

    fn harness() -> Harness {
        let api = Arc::new(MockPaymentApi::new());
        let backend = Arc::new(MemorySnapshotBackend::new());
        let store = Arc::new(SessionSnapshotStore::new(
            backend.clone(),
            api.clone(),
            Duration::from_secs(15),
        ));
        let coordinator = Arc::new(PaymentIntentCoordinator::new(
            api.clone(),
            store,
            ActorId::new("user-1"),
            900,
        ));
        Harness {
            coordinator,
            api,
            backend,
        }
    }

    async fn create(h: &Harness, product_ref: &str) -> Result<PaymentIntent, PaymentError> {
        h.coordinator
            .create(
                ProductType::new("course"),
                ProductRef::new(product_ref),
                Decimal::from(20),
                "USDT",
            )
            .await
    }

    #[tokio::test]
    async fn test_create_writes_snapshot() {
        let h = harness();
        let intent = create(&h, "c1").await.unwrap();
        assert_eq!(intent.status, IntentStatus::AwaitingRail);
        assert_eq!(intent.token.as_str(), "tok_1");
        assert_eq!(h.backend.len(), 1);
        assert_eq!(h.coordinator.active_count(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_create() {
        let h = harness();
        let first = create(&h, "c1").await.unwrap();
        let second = create(&h, "c1").await.unwrap();
        assert_eq!(first.token, second.token);
        assert_eq!(h.api.create_count(), 1);

        // Different product gets its own intent
        let other = create(&h, "c2").await.unwrap();
        assert_ne!(other.token, first.token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_create_single_server_call() {
        let h = harness();
        h.api.set_create_delay(Duration::from_millis(200));

        let a = tokio::spawn({
            let c = h.coordinator.clone();
            async move {
                c.create(ProductType::new("course"), ProductRef::new("c1"), Decimal::from(20), "USDT")
                    .await
            }
        });
        let b = tokio::spawn({
            let c = h.coordinator.clone();
            async move {
                c.create(ProductType::new("course"), ProductRef::new("c1"), Decimal::from(20), "USDT")
                    .await
            }
        });

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.token, b.token);
        assert_eq!(h.api.create_count(), 1);
    }

    #[tokio::test]
    async fn test_create_resumes_from_snapshot_after_restart() {
        let h = harness();
        let first = create(&h, "c1").await.unwrap();

        // New coordinator over the same storage, as after a reload
        let store = Arc::new(SessionSnapshotStore::new(
            h.backend.clone(),
            h.api.clone(),
            Duration::from_secs(15),
        ));
        let reloaded =
            PaymentIntentCoordinator::new(h.api.clone(), store, ActorId::new("user-1"), 900);
        let resumed = reloaded
            .create(ProductType::new("course"), ProductRef::new("c1"), Decimal::from(20), "USDT")
            .await
            .unwrap();

        assert_eq!(resumed.token, first.token);
        assert_eq!(h.api.create_count(), 1);
        assert_eq!(h.api.status_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_errors_never_reach_server() {
        let h = harness();
        let err = h
            .coordinator
            .create(ProductType::new("course"), ProductRef::new("c1"), Decimal::from(20), "DOGE")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = h
            .coordinator
            .create(ProductType::new("course"), ProductRef::new("c1"), Decimal::new(1, 7), "USDT")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(h.api.create_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_not_retried() {
        let h = harness();
        h.api.set_create_error(Some(ApiError::Server { status: 503 }));
        let err = create(&h, "c1").await.unwrap_err();
        assert!(matches!(err, PaymentError::Remote(_)));
        assert!(err.is_resumable());
        assert_eq!(h.api.create_count(), 1);
        assert!(h.backend.is_empty());

        h.api.set_create_error(Some(ApiError::Rejected {
            status: 422,
            message: "amount below minimum".into(),
        }));
        let err = create(&h, "c1").await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_status_monotonic_and_terminal_clears() {
        let h = harness();
        create(&h, "c1").await.unwrap();
        let product_ref = ProductRef::new("c1");

        let intent = h
            .coordinator
            .apply_rail_outcome(
                &product_ref,
                RailKind::ExchangeDeposit,
                &RailOutcome::AwaitingDeposit(DepositInstructions {
                    address: "addr".into(),
                    memo: "tok_1".into(),
                    network: None,
                }),
            )
            .unwrap();
        assert_eq!(intent.status, IntentStatus::AwaitingConfirmation);
        assert_eq!(intent.rail, Some(RailKind::ExchangeDeposit));
        let snapshot = h.backend.load(&product_ref).unwrap().unwrap();
        assert_eq!(snapshot.rail, Some(RailKind::ExchangeDeposit));

        let settled = h
            .coordinator
            .record_status(&product_ref, IntentStatus::Settled)
            .unwrap();
        assert_eq!(settled.status, IntentStatus::Settled);
        assert!(h.backend.is_empty());
        assert!(h.coordinator.active(&product_ref).is_none());

        // Late event after terminal: nothing left to update
        let err = h
            .coordinator
            .record_status(&product_ref, IntentStatus::AwaitingConfirmation)
            .unwrap_err();
        assert_eq!(err.code(), "NO_ACTIVE_INTENT");
    }

    #[tokio::test]
    async fn test_stale_status_ignored() {
        let h = harness();
        create(&h, "c1").await.unwrap();
        let product_ref = ProductRef::new("c1");
        h.coordinator
            .record_status(&product_ref, IntentStatus::AwaitingConfirmation)
            .unwrap();
        let intent = h
            .coordinator
            .record_status(&product_ref, IntentStatus::AwaitingRail)
            .unwrap();
        assert_eq!(intent.status, IntentStatus::AwaitingConfirmation);
        assert_eq!(h.backend.len(), 1);
    }

    #[tokio::test]
    async fn test_check_status_records_result() {
        let h = harness();
        let intent = create(&h, "c1").await.unwrap();
        h.api
            .push_status(Ok(StatusReport::new(IntentStatus::Settled)));

        let status = h.coordinator.check_status(&intent.token).await.unwrap();
        assert_eq!(status, IntentStatus::Settled);
        assert!(h.coordinator.active(&ProductRef::new("c1")).is_none());
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_abandon_allows_fresh_intent() {
        let h = harness();
        let first = create(&h, "c1").await.unwrap();
        let abandoned = h.coordinator.abandon(&ProductRef::new("c1")).unwrap();
        assert_eq!(abandoned.map(|i| i.token), Some(first.token.clone()));
        assert!(h.backend.is_empty());

        let second = create(&h, "c1").await.unwrap();
        assert_ne!(second.token, first.token);
        assert_eq!(h.api.create_count(), 2);
    }

    /// Stores fine, fails every removal
    #[derive(Default)]
    struct StickyBackend {
        inner: MemorySnapshotBackend,
    }

    impl SnapshotBackend for StickyBackend {
        fn load(&self, product_ref: &ProductRef) -> Result<Option<SessionSnapshot>, SnapshotError> {
            self.inner.load(product_ref)
        }

        fn store(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
            self.inner.store(snapshot)
        }

        fn remove(&self, _product_ref: &ProductRef) -> Result<(), SnapshotError> {
            Err(SnapshotError::Io(std::io::Error::other("read-only storage")))
        }
    }

    #[tokio::test]
    async fn test_settlement_survives_snapshot_clear_failure() {
        let api = Arc::new(MockPaymentApi::new());
        let backend = Arc::new(StickyBackend::default());
        let store = Arc::new(SessionSnapshotStore::new(
            backend.clone(),
            api.clone(),
            Duration::from_secs(15),
        ));
        let coordinator =
            PaymentIntentCoordinator::new(api.clone(), store, ActorId::new("user-1"), 900);
        let product_ref = ProductRef::new("c1");
        coordinator
            .create(ProductType::new("course"), product_ref.clone(), Decimal::from(20), "USDT")
            .await
            .unwrap();

        let settled = coordinator
            .record_status(&product_ref, IntentStatus::Settled)
            .unwrap();
        assert_eq!(settled.status, IntentStatus::Settled);
        assert!(coordinator.active(&product_ref).is_none());
        assert_eq!(backend.inner.len(), 1, "stale record stays behind");
    }

    #[tokio::test]
    async fn test_locks_pruned_after_terminal_and_abandon() {
        let h = harness();
        create(&h, "c1").await.unwrap();
        create(&h, "c2").await.unwrap();
        assert_eq!(h.coordinator.create_locks.len(), 2);

        h.coordinator
            .record_status(&ProductRef::new("c1"), IntentStatus::Settled)
            .unwrap();
        h.coordinator.abandon(&ProductRef::new("c2")).unwrap();
        assert_eq!(h.coordinator.create_locks.len(), 0);
        assert_eq!(h.coordinator.flow_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_second_flow_for_same_reference_refused() {
        let h = harness();
        let product_ref = ProductRef::new("c1");
        let guard = h.coordinator.begin_flow(&product_ref).unwrap();
        assert_eq!(guard.product_ref(), &product_ref);

        let err = h.coordinator.begin_flow(&product_ref).err().unwrap();
        assert_eq!(err.code(), "FLOW_IN_PROGRESS");
        let other = h.coordinator.begin_flow(&ProductRef::new("c2")).unwrap();

        h.coordinator.end_flow(other);
        h.coordinator.end_flow(guard);
        assert_eq!(h.coordinator.flow_locks.len(), 0);
        let again = h.coordinator.begin_flow(&product_ref).unwrap();
        h.coordinator.end_flow(again);
    }
}
