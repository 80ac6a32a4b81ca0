//! payflow - command line driver
//!
//! ```text
//! payflow [--env dev] --notify <subjectId>
//! payflow [--env dev] --pay <productType> <productRef> <amount> <currency> --rail <rail> [--channel push|poll]
//! ```
//!
//! `--notify` keeps a notification session open and prints cache updates
//! until Ctrl-C. `--pay` runs one purchase to a terminal status.

use anyhow::{Context, bail};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use payflow::config::AppConfig;
use payflow::confirmation::{ConfirmationChannel, PollChannel, PushChannel, SsePushTransport};
use payflow::logging::init_logging;
use payflow::money::{Amount, Currency};
use payflow::notification::{NotificationCache, RealtimeNotificationManager, WsSocketTransport};
use payflow::payment::{
    ExchangeDepositRail, FlowState, HttpPaymentApi, PaymentApi, PaymentFlow,
    PaymentIntentCoordinator, PaymentRequest, PointsCurrencyRail, RailAdapter, RailKind,
};
use payflow::reconnect::BackoffPolicy;
use payflow::snapshot::{
    FileSnapshotBackend, MemorySnapshotBackend, SessionSnapshotStore, SnapshotBackend,
};
use payflow::{ActorId, ProductRef, ProductType, SubjectId};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Values following `flag`, up to `count` of them
fn get_values(flag: &str, count: usize) -> Option<Vec<String>> {
    let args: Vec<String> = std::env::args().collect();
    let pos = args.iter().position(|a| a == flag)?;
    let values: Vec<String> = args.iter().skip(pos + 1).take(count).cloned().collect();
    if values.len() == count && values.iter().all(|v| !v.starts_with("--")) {
        Some(values)
    } else {
        None
    }
}

fn get_value(flag: &str) -> Option<String> {
    get_values(flag, 1).and_then(|mut v| v.pop())
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  payflow [--env <env>] --notify <subjectId>");
    eprintln!(
        "  payflow [--env <env>] --pay <productType> <productRef> <amount> <currency> --rail <exchange|points> [--channel push|poll]"
    );
}

// ============================================================
// NOTIFICATION SESSION
// ============================================================

async fn run_notify(config: &AppConfig, subject: SubjectId) -> anyhow::Result<()> {
    let transport = Arc::new(WsSocketTransport::new(config.notification.url.clone()));
    let manager = RealtimeNotificationManager::with_cache(
        transport,
        BackoffPolicy::from(&config.notification.backoff),
        NotificationCache::new(config.notification.cache_capacity),
    );
    let mut state = manager.state();
    let mut cache = manager.cache();

    manager.connect(subject.clone())?;
    info!(subject = %subject, url = %config.notification.url, "Notification session started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("connection: {}", current);
                if current.is_disconnected() {
                    break;
                }
            }
            changed = cache.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = cache.borrow_and_update().clone();
                println!("unread: {}", snapshot.unread());
                if let Some(latest) = snapshot.items().next() {
                    println!("  latest: [{}] {}", latest.id, latest.title);
                }
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}

// ============================================================
// PAYMENT FLOW
// ============================================================

fn snapshot_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn SnapshotBackend>> {
    Ok(match &config.snapshot.dir {
        Some(dir) => Arc::new(
            FileSnapshotBackend::open(dir)
                .with_context(|| format!("Failed to open snapshot dir {}", dir))?,
        ),
        None => Arc::new(MemorySnapshotBackend::new()),
    })
}

fn rail_for(kind: RailKind, api: Arc<dyn PaymentApi>) -> anyhow::Result<Box<dyn RailAdapter>> {
    match kind {
        RailKind::ExchangeDeposit => Ok(Box::new(ExchangeDepositRail::new(api))),
        RailKind::PointsCurrency => Ok(Box::new(PointsCurrencyRail::new(api))),
        RailKind::WalletTransfer => {
            bail!("the wallet rail needs a host wallet integration and cannot run from the CLI")
        }
    }
}

async fn run_pay(config: &AppConfig, args: Vec<String>) -> anyhow::Result<()> {
    let [product_type, product_ref, amount, currency]: [String; 4] = args
        .try_into()
        .map_err(|_| anyhow::anyhow!("--pay takes four values"))?;
    let currency = Currency::from_str(&currency)?;
    let amount = Amount::parse(&amount, currency)?;
    let rail_kind = RailKind::from_str(&get_value("--rail").unwrap_or_else(|| "exchange".into()))
        .map_err(anyhow::Error::msg)?;

    let api: Arc<dyn PaymentApi> = Arc::new(HttpPaymentApi::new(&config.api)?);
    let store = Arc::new(SessionSnapshotStore::new(
        snapshot_backend(config)?,
        api.clone(),
        Duration::from_millis(config.snapshot.revalidate_timeout_ms),
    ));
    let coordinator = Arc::new(PaymentIntentCoordinator::new(
        api.clone(),
        store,
        ActorId::new(config.api.actor_id.clone()),
        config.snapshot.ttl_seconds,
    ));
    let flow = PaymentFlow::new(coordinator);
    let rail = rail_for(rail_kind, api.clone())?;

    let channel: Box<dyn ConfirmationChannel> = match get_value("--channel").as_deref() {
        Some("poll") => Box::new(PollChannel::new(api.clone(), &config.poll)),
        Some("push") | None => Box::new(PushChannel::new(
            Arc::new(SsePushTransport::new(&config.api)?),
            BackoffPolicy::from(&config.push),
        )),
        Some(other) => bail!("unknown channel {}", other),
    };

    let mut state = flow.state();
    let printer = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            match current {
                FlowState::AwaitingConfirmation {
                    intent,
                    instructions: Some(deposit),
                } => {
                    println!("[{}] {}", intent.token, intent.status);
                    println!(
                        "  send {} to {} with memo {}",
                        intent.amount, deposit.address, deposit.memo
                    );
                }
                FlowState::AwaitingConfirmation { intent, .. }
                | FlowState::ExecutingRail(intent) => {
                    println!("[{}] {}", intent.token, intent.status);
                }
                FlowState::Creating => println!("creating intent..."),
                FlowState::Completed(_) | FlowState::Failed { .. } | FlowState::Idle => {}
            }
        }
    });

    let request = PaymentRequest {
        product_type: ProductType::new(product_type),
        product_ref: ProductRef::new(product_ref),
        amount: amount.value(),
        currency: currency.to_string(),
    };
    let result = flow.run(&request, rail.as_ref(), channel.as_ref()).await;
    drop(flow);
    let _ = printer.await;

    match result {
        Ok(intent) => {
            println!("{}", intent);
            Ok(())
        }
        Err(e) => {
            if e.is_resumable() {
                warn!(code = e.code(), "Payment can be resumed by running the same command again");
            }
            bail!("{} ({})", e, e.code())
        }
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("Loading config for {}", env))?;
    let _log_guard = init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("PAYFLOW_BUILD"),
        "Starting payflow in {} mode",
        env
    );

    if let Some(subject) = get_value("--notify") {
        return run_notify(&config, SubjectId::new(subject)).await;
    }
    if let Some(args) = get_values("--pay", 4) {
        return run_pay(&config, args).await;
    }

    print_usage();
    Ok(())
}
