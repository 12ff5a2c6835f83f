//! kc_bank service entry point
//!
//! ```text
//! HTTP ──▶ gateway ──sync──▶ TransferCoordinator ──▶ LedgerStore
//!             │                     ▲      │
//!             └─async─▶ queue ──▶ consumers└──▶ IdempotencyGuard
//!                                   ▲
//!                    RecoveryWorker ┘ (stale in-flight transfers)
//! ```
//!
//! Modes:
//! - `--gateway` (default): HTTP API + consumer pool + recovery worker
//! - `--consumer`: consumer pool + recovery worker, no HTTP
//!
//! Options: `--env/-e <name>` picks `config/<name>.yaml`, `--port <n>`
//! overrides the gateway port.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, info_span, warn};

use kc_bank::config::{AppConfig, QueueBackend};
use kc_bank::db::Database;
use kc_bank::gateway::{self, AppState};
use kc_bank::ledger::{AccountService, InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use kc_bank::queue::{InMemoryQueue, PgQueue, TransferConsumer, TransferQueue};
use kc_bank::transfer::{
    CancelSignal, IdempotencyGuard, InMemoryIdempotencyGuard, PgIdempotencyGuard, RecoveryWorker,
    TransferCoordinator, WorkerConfig,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

fn use_consumer_mode() -> bool {
    let args: Vec<String> = std::env::args().collect();
    args.iter().any(|a| a == "--consumer") && !args.iter().any(|a| a == "--gateway")
}

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    guard: Arc<dyn IdempotencyGuard>,
    queue: Arc<dyn TransferQueue>,
    db: Option<Arc<Database>>,
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    let Some(url) = config.postgres_url.as_deref() else {
        if config.queue.backend == QueueBackend::Postgres {
            warn!("queue.backend is postgres but no postgres_url is set, using the in-memory queue");
        }
        info!("Running on in-memory stores");
        return Ok(Stores {
            ledger: Arc::new(InMemoryLedgerStore::new()),
            guard: Arc::new(InMemoryIdempotencyGuard::new()),
            queue: Arc::new(InMemoryQueue::new(config.queue.max_deliveries)),
            db: None,
        });
    };

    let db = Database::connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.migrate().await.context("Failed to apply schema")?;
    let pool = db.pool().clone();
    info!("Connected to PostgreSQL");

    let queue: Arc<dyn TransferQueue> = match config.queue.backend {
        QueueBackend::Postgres => Arc::new(PgQueue::new(pool.clone(), &config.queue)),
        QueueBackend::Memory => Arc::new(InMemoryQueue::new(config.queue.max_deliveries)),
    };

    Ok(Stores {
        ledger: Arc::new(PgLedgerStore::new(pool.clone())),
        guard: Arc::new(PgIdempotencyGuard::new(pool)),
        queue,
        db: Some(Arc::new(db)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = kc_bank::logging::init_logging(&config);
    let consumer_mode = use_consumer_mode();
    let mode = if consumer_mode { "consumer" } else { "gateway" };

    info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        mode,
        "Starting kc_bank"
    );

    let stores = build_stores(&config).await?;
    let coordinator = Arc::new(TransferCoordinator::with_span(
        stores.ledger.clone(),
        stores.guard,
        &config.transfer,
        info_span!("transfer"),
    ));

    let shutdown = CancelSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
            shutdown.cancel();
        });
    }

    let consumer = Arc::new(
        TransferConsumer::new(stores.queue.clone(), coordinator.clone(), &config.queue)
            .with_span(info_span!("queue", backend = stores.queue.name())),
    );
    let consumers = tokio::spawn(consumer.run(shutdown.clone()));

    let recovery = RecoveryWorker::new(coordinator.clone(), WorkerConfig::from(&config.recovery))
        .with_span(info_span!("recovery"));
    let recovery = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { recovery.run(shutdown).await })
    };

    if consumer_mode {
        if config.queue.backend == QueueBackend::Memory {
            warn!("Consumer mode with an in-memory queue has no producer");
        }
        shutdown.cancelled().await;
    } else {
        let mut state = AppState::new(
            coordinator,
            Arc::new(AccountService::new(stores.ledger)),
            stores.queue,
        );
        if let Some(db) = stores.db {
            state = state.with_database(db);
        }
        let served = gateway::run_server(
            &config.gateway.host,
            config.gateway.port,
            Arc::new(state),
            shutdown.clone(),
        )
        .await;
        // A bind failure must also stop the background tasks
        shutdown.cancel();
        served?;
    }

    if let Err(e) = consumers.await {
        error!(error = %e, "Consumer pool panicked");
    }
    if let Err(e) = recovery.await {
        error!(error = %e, "Recovery worker panicked");
    }
    info!("Shutdown complete");
    Ok(())
}
