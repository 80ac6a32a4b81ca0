//! Payment Flow
//!
//! Drives one purchase end to end:
//!
//! ```text
//! create/resume intent → rail.execute → confirmation channel → terminal
//! ```
//!
//! Only one flow per product reference runs at a time; a duplicate `run()`
//! fails with `FlowInProgress` and leaves the running flow untouched.
//!
//! Every step is published to a `watch` channel for the UI. Intent-creation
//! and rail errors return to the caller directly; transport give-ups arrive
//! through the channel callback and get one explicit status check before
//! surfacing as `Connectivity`.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::coordinator::PaymentIntentCoordinator;
use super::error::PaymentError;
use super::rails::RailAdapter;
use super::state::IntentStatus;
use super::types::{DepositInstructions, PaymentIntent, RailOutcome};
use crate::confirmation::{ChannelEvent, ConfirmationChannel};
use crate::core_types::{ProductRef, ProductType};

/// What the caller wants to buy
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub product_type: ProductType,
    pub product_ref: ProductRef,
    pub amount: Decimal,
    pub currency: String,
}

/// UI-facing flow state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowState {
    #[default]
    Idle,
    Creating,
    ExecutingRail(PaymentIntent),
    AwaitingConfirmation {
        intent: PaymentIntent,
        /// Present for manual exchange deposits
        instructions: Option<DepositInstructions>,
    },
    Completed(PaymentIntent),
    Failed {
        code: &'static str,
        message: String,
        /// The same intent can be resumed with a manual action
        resumable: bool,
    },
}

pub struct PaymentFlow {
    coordinator: Arc<PaymentIntentCoordinator>,
    state: watch::Sender<FlowState>,
}

impl PaymentFlow {
    pub fn new(coordinator: Arc<PaymentIntentCoordinator>) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self { coordinator, state }
    }

    pub fn state(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    pub fn coordinator(&self) -> &Arc<PaymentIntentCoordinator> {
        &self.coordinator
    }

    /// Run the purchase; resolves with the terminal intent
    ///
    /// `Settled` and `Failed` intents are returned as `Ok`; the caller reads
    /// the status. `Expired` is returned as an error since the intent must
    /// be recreated. A second concurrent run for the same product reference
    /// returns `FlowInProgress` without touching the published state.
    pub async fn run(
        &self,
        request: &PaymentRequest,
        rail: &dyn RailAdapter,
        channel: &dyn ConfirmationChannel,
    ) -> Result<PaymentIntent, PaymentError> {
        // Refused before any state is published: the running flow owns it
        let guard = self.coordinator.begin_flow(&request.product_ref).map_err(|e| {
            warn!(product_ref = %request.product_ref, "Payment flow already running, refusing duplicate");
            e
        })?;
        let result = self.drive(request, rail, channel).await;
        self.coordinator.end_flow(guard);
        if let Err(e) = &result {
            warn!(product_ref = %request.product_ref, code = e.code(), error = %e, "Payment flow stopped");
            self.state.send_replace(FlowState::Failed {
                code: e.code(),
                message: e.to_string(),
                resumable: e.is_resumable(),
            });
        }
        result
    }

    async fn drive(
        &self,
        request: &PaymentRequest,
        rail: &dyn RailAdapter,
        channel: &dyn ConfirmationChannel,
    ) -> Result<PaymentIntent, PaymentError> {
        self.state.send_replace(FlowState::Creating);
        let mut intent = self
            .coordinator
            .create(
                request.product_type.clone(),
                request.product_ref.clone(),
                request.amount,
                &request.currency,
            )
            .await?;

        let mut instructions = None;
        if intent.status == IntentStatus::AwaitingConfirmation {
            // Resumed after the rail already ran; just keep observing
            info!(token = %intent.token, "Resuming confirmation for pending intent");
        } else {
            self.state.send_replace(FlowState::ExecutingRail(intent.clone()));
            let outcome = rail.execute(&intent).await?;
            intent = self
                .coordinator
                .apply_rail_outcome(&request.product_ref, rail.kind(), &outcome)?;
            if intent.status.is_terminal() {
                return self.finish(intent);
            }
            if let RailOutcome::AwaitingDeposit(deposit) = outcome {
                instructions = Some(deposit);
            }
        }

        self.state.send_replace(FlowState::AwaitingConfirmation {
            intent: intent.clone(),
            instructions: instructions.clone(),
        });
        let intent = self.observe(intent, instructions, channel).await?;
        self.finish(intent)
    }

    /// Follow the channel until a terminal status
    async fn observe(
        &self,
        mut intent: PaymentIntent,
        instructions: Option<DepositInstructions>,
        channel: &dyn ConfirmationChannel,
    ) -> Result<PaymentIntent, PaymentError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = channel.subscribe(
            intent.token.clone(),
            Box::new(move |event| {
                let _ = tx.send(event);
            }),
        );

        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Status(event) => {
                    intent = self
                        .coordinator
                        .record_status(&intent.product_ref, event.status)?;
                    if intent.status.is_terminal() {
                        return Ok(intent);
                    }
                    self.state.send_replace(FlowState::AwaitingConfirmation {
                        intent: intent.clone(),
                        instructions: instructions.clone(),
                    });
                }
                ChannelEvent::ConnectivityError { attempts } => {
                    warn!(token = %intent.token, attempts, "Confirmation transport gave up, checking status once");
                    let status = self.coordinator.check_status(&intent.token).await?;
                    if status.is_terminal() {
                        intent.status = status;
                        return Ok(intent);
                    }
                    return Err(PaymentError::Connectivity { attempts });
                }
            }
        }

        drop(subscription);
        Err(PaymentError::Remote(
            "confirmation channel closed without a terminal status".into(),
        ))
    }

    fn finish(&self, intent: PaymentIntent) -> Result<PaymentIntent, PaymentError> {
        if intent.status == IntentStatus::Expired {
            return Err(PaymentError::Expired(intent.token));
        }
        info!(token = %intent.token, status = %intent.status, "Payment flow completed");
        self.state.send_replace(FlowState::Completed(intent.clone()));
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::{EventCallback, PollChannel, Subscription};
    use crate::core_types::IntentToken;
    use crate::money::Amount;
    use crate::payment::api::mock::MockPaymentApi;
    use crate::payment::rails::{
        ExchangeDepositRail, PointsCurrencyRail, TransferReceipt, WalletCapability, WalletError,
        WalletTransferRail,
    };
    use crate::payment::types::{ConfirmationEvent, StatusReport};
    use crate::snapshot::{MemorySnapshotBackend, SessionSnapshotStore};
    use crate::task::TaskHandle;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        flow: PaymentFlow,
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
            crate::core_types::ActorId::new("user-1"),
            900,
        ));
        Harness {
            flow: PaymentFlow::new(coordinator),
            api,
            backend,
        }
    }

    fn request(amount: i64, currency: &str) -> PaymentRequest {
        PaymentRequest {
            product_type: ProductType::new("course"),
            product_ref: ProductRef::new("c1"),
            amount: Decimal::from(amount),
            currency: currency.to_string(),
        }
    }

    /// Emits a fixed event list, then stops
    #[derive(Default)]
    struct ScriptedChannel {
        events: Mutex<Vec<ChannelEvent>>,
        subscriptions: AtomicUsize,
    }

    impl ScriptedChannel {
        fn with(events: Vec<ChannelEvent>) -> Self {
            Self {
                events: Mutex::new(events),
                subscriptions: AtomicUsize::new(0),
            }
        }
    }

    impl ConfirmationChannel for ScriptedChannel {
        fn subscribe(&self, token: IntentToken, mut on_event: EventCallback) -> Subscription {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let events: Vec<ChannelEvent> = self.events.lock().unwrap().drain(..).collect();
            Subscription::new(TaskHandle::spawn(move |_cancel| async move {
                for event in events {
                    let event = match event {
                        ChannelEvent::Status(e) => ChannelEvent::Status(ConfirmationEvent {
                            token: token.clone(),
                            ..e
                        }),
                        other => other,
                    };
                    on_event(event);
                }
            }))
        }
    }

    fn status(status: IntentStatus) -> ChannelEvent {
        ChannelEvent::Status(ConfirmationEvent {
            token: IntentToken::new("placeholder"),
            status,
            payload: None,
        })
    }

    struct DecliningWallet;

    #[async_trait]
    impl WalletCapability for DecliningWallet {
        async fn submit_transfer(
            &self,
            _amount: &Amount,
            _memo: &str,
        ) -> Result<TransferReceipt, WalletError> {
            Err(WalletError::Declined)
        }
    }

    /// Takes a while to sign, counts every submission
    #[derive(Default)]
    struct SlowWallet {
        submits: AtomicUsize,
    }

    #[async_trait]
    impl WalletCapability for SlowWallet {
        async fn submit_transfer(
            &self,
            _amount: &Amount,
            memo: &str,
        ) -> Result<TransferReceipt, WalletError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(TransferReceipt {
                submitted: true,
                tx_ref: Some(format!("tx_{}", memo)),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_submit_wallet_transfer_once() {
        let h = harness();
        let flow = Arc::new(h.flow);
        let wallet = Arc::new(SlowWallet::default());
        let rail = Arc::new(WalletTransferRail::new(wallet.clone()));
        let channel = Arc::new(ScriptedChannel::with(vec![status(IntentStatus::Settled)]));

        let runs: Vec<_> = (0..2)
            .map(|_| {
                let (flow, rail, channel) = (flow.clone(), rail.clone(), channel.clone());
                tokio::spawn(async move {
                    flow.run(&request(20, "USDT"), rail.as_ref(), channel.as_ref())
                        .await
                })
            })
            .collect();

        let mut settled = 0;
        let mut refused = 0;
        for run in runs {
            match run.await.unwrap() {
                Ok(intent) => {
                    assert_eq!(intent.status, IntentStatus::Settled);
                    settled += 1;
                }
                Err(e) => {
                    assert_eq!(e.code(), "FLOW_IN_PROGRESS");
                    refused += 1;
                }
            }
        }

        assert_eq!((settled, refused), (1, 1));
        assert_eq!(wallet.submits.load(Ordering::SeqCst), 1);
        assert_eq!(h.api.create_count(), 1);
        assert!(matches!(*flow.state().borrow(), FlowState::Completed(_)));

        // The guard is released once the flow ends
        assert!(flow.coordinator().begin_flow(&ProductRef::new("c1")).is_ok());
    }

    #[tokio::test]
    async fn test_points_rail_bypasses_channel() {
        let h = harness();
        let rail = PointsCurrencyRail::new(h.api.clone());
        let channel = ScriptedChannel::default();

        let intent = h.flow.run(&request(300, "POINTS"), &rail, &channel).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Settled);
        assert_eq!(channel.subscriptions.load(Ordering::SeqCst), 0);
        assert_eq!(h.api.deduct_count(), 1);
        assert!(h.backend.is_empty());
        assert!(matches!(*h.flow.state().borrow(), FlowState::Completed(_)));
    }

    #[tokio::test]
    async fn test_exchange_flow_applies_monotonic_events() {
        let h = harness();
        let rail = ExchangeDepositRail::new(h.api.clone());
        let channel = ScriptedChannel::with(vec![
            status(IntentStatus::AwaitingConfirmation),
            status(IntentStatus::Settled),
            status(IntentStatus::AwaitingConfirmation),
        ]);

        let intent = h.flow.run(&request(20, "USDT"), &rail, &channel).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Settled);
        assert!(h.backend.is_empty());
        assert!(h.flow.coordinator().active(&ProductRef::new("c1")).is_none());
    }

    #[tokio::test]
    async fn test_rail_rejection_keeps_intent() {
        let h = harness();
        let rail = WalletTransferRail::new(Arc::new(DecliningWallet));
        let channel = ScriptedChannel::default();

        let err = h.flow.run(&request(5, "TON"), &rail, &channel).await.unwrap_err();
        assert_eq!(err.code(), "RAIL_REJECTION");
        assert!(h.flow.coordinator().active(&ProductRef::new("c1")).is_some());
        assert_eq!(h.backend.len(), 1);
        match &*h.flow.state().borrow() {
            FlowState::Failed { resumable, .. } => assert!(*resumable),
            other => panic!("unexpected state {:?}", other),
        }

        // Retrying reuses the same token
        let before = h.api.create_count();
        let _ = h.flow.run(&request(5, "TON"), &rail, &channel).await;
        assert_eq!(h.api.create_count(), before);
    }

    #[tokio::test]
    async fn test_unsupported_rail_currency_is_validation_error() {
        let h = harness();
        let rail = PointsCurrencyRail::new(h.api.clone());
        let channel = ScriptedChannel::default();

        let err = h.flow.run(&request(20, "USDT"), &rail, &channel).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(h.api.deduct_count(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_error_checks_status_once() {
        let h = harness();
        let rail = ExchangeDepositRail::new(h.api.clone());
        let channel = ScriptedChannel::with(vec![ChannelEvent::ConnectivityError { attempts: 5 }]);
        h.api.set_fallback_status(IntentStatus::AwaitingConfirmation);

        let err = h.flow.run(&request(20, "USDT"), &rail, &channel).await.unwrap_err();
        assert!(matches!(err, PaymentError::Connectivity { attempts: 5 }));
        assert_eq!(h.api.status_count(), 1);
        // Still pending and resumable
        assert_eq!(h.backend.len(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_error_with_settled_status_completes() {
        let h = harness();
        let rail = ExchangeDepositRail::new(h.api.clone());
        let channel = ScriptedChannel::with(vec![ChannelEvent::ConnectivityError { attempts: 5 }]);
        h.api.push_status(Ok(StatusReport::new(IntentStatus::Settled)));

        let intent = h.flow.run(&request(20, "USDT"), &rail, &channel).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Settled);
        assert!(h.backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_surfaces_expired() {
        let h = harness();
        let rail = ExchangeDepositRail::new(h.api.clone());
        h.api.set_fallback_status(IntentStatus::AwaitingConfirmation);
        let channel = PollChannel::with_timing(
            h.api.clone(),
            Duration::from_secs(3),
            Duration::from_secs(30),
            Duration::from_secs(15),
        );

        let err = h.flow.run(&request(20, "USDT"), &rail, &channel).await.unwrap_err();
        assert!(matches!(err, PaymentError::Expired(_)));
        assert!(!err.is_resumable());
        assert!(h.backend.is_empty());
        assert!(h.flow.coordinator().active(&ProductRef::new("c1")).is_none());
    }
}
