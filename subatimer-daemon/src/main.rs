//! Subatimer daemon
//!
//! Headless subathon support pipeline: normalizes support events from
//! platform connectors, applies them to the active accrual, and notifies
//! outbound sinks.

mod config;
mod shutdown;
mod simulate;

use clap::Parser;
use config::ConfigLoader;
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use subatimer_core::applier::AccrualApplier;
use subatimer_core::currency::CurrencyNormalizer;
use subatimer_core::events::{
    ErrorCategory, ErrorEventReceiver, error_channel, ingress_channel, processed_channel,
};
use subatimer_core::ingress::EventIngress;
use subatimer_core::multiplier::MultiplierEngine;
use subatimer_core::notifier::OutboundNotifier;
use subatimer_core::queue::{EventQueue, QueueProcessor};
use subatimer_core::settings::settings_channel;
use subatimer_core::store::{MemoryStore, PgStore, Store};
use subatimer_core::values::ValueResolver;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Subatimer - headless subathon support event pipeline
#[derive(Parser, Debug)]
#[command(name = "subatimer-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./subatimer.toml")]
    config: PathBuf,

    /// Run against the in-memory store instead of Postgres
    #[arg(long, default_value = "false")]
    in_memory: bool,

    /// Feed synthetic simulated-source events through the pipeline
    #[arg(long, default_value = "false")]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting subatimer-daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config));
    let file_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let (settings_tx, settings_rx) = settings_channel(file_config.settings.clone());
    let settings = settings_rx.borrow().clone();

    // Pick the store backend
    let mut pg_pool = None;
    let store: Arc<dyn Store> = if args.in_memory {
        tracing::warn!("Running with the in-memory store; nothing will be persisted");
        Arc::new(MemoryStore::with_active_accrual(&settings.currency.base))
    } else {
        let database_url = file_config.database_url().ok_or_else(|| {
            tracing::error!("No database URL: set DATABASE_URL or [database].url");
            anyhow::anyhow!("missing database URL")
        })?;

        tracing::info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to database: {}", e);
                e
            })?;
        tracing::info!("Database connection established");
        pg_pool = Some(pool.clone());
        Arc::new(PgStore::new(pool))
    };

    // Channels and shared state
    let (errors, error_rx) = error_channel();
    let (ingress_tx, ingress_rx) = ingress_channel();
    let (processed_tx, _processed_rx) = processed_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let resolver = Arc::new(ValueResolver::load(Arc::clone(&store)).await?);
    let currency = Arc::new(CurrencyNormalizer::new(
        settings.currency.base.as_str(),
        settings.currency.feed_url.clone(),
        settings.currency.cache_path.clone(),
        errors.clone(),
    ));

    // Resume a persisted multiplier across restarts.
    let engine = match store.active_accrual().await? {
        Some(accrual) => Arc::new(MultiplierEngine::with_state(accrual.multiplier)),
        None => Arc::new(MultiplierEngine::new()),
    };

    let queue = EventQueue::new();
    let applier = AccrualApplier::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        settings_rx.clone(),
        errors.clone(),
    );

    // Spawn the pipeline
    let ingress = EventIngress::new(
        resolver,
        currency,
        Arc::clone(&engine),
        Arc::clone(&store),
        queue.clone(),
        errors.clone(),
    );
    let ingress_handle = tokio::spawn(ingress.run(ingress_rx, shutdown_rx.clone()));

    let processor = QueueProcessor::new(queue.clone(), applier, processed_tx.clone());
    let processor_handle = tokio::spawn(processor.run(shutdown_rx.clone()));

    let notifier = OutboundNotifier::new(processed_tx.subscribe(), settings_rx.clone());
    let notifier_handle = tokio::spawn(notifier.run(shutdown_rx.clone()));

    let error_log_handle = tokio::spawn(log_error_events(error_rx, shutdown_rx.clone()));

    if args.simulate {
        tokio::spawn(simulate::run(ingress_tx.clone(), shutdown_rx.clone()));
    }

    // Reload settings on SIGHUP
    let reload_notify = spawn_config_reload_handler(config_loader, settings_tx);

    // Block until a shutdown signal arrives
    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    queue.wake();
    reload_notify.notify_one();
    drop(ingress_tx);

    let _ = ingress_handle.await;
    let _ = processor_handle.await;
    let _ = notifier_handle.await;
    let _ = error_log_handle.await;

    if let Some(pool) = pg_pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Daemon shutdown complete");

    Ok(())
}

/// Drain the error-notification surface into the log.
async fn log_error_events(mut error_rx: ErrorEventReceiver, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            received = error_rx.recv() => {
                match received {
                    Ok(event) => match event.category {
                        ErrorCategory::Consistency => {
                            tracing::error!(source = event.source, category = %event.category, "{}", event.message);
                        }
                        ErrorCategory::RejectedInput | ErrorCategory::TransientExternal => {
                            tracing::warn!(source = event.source, category = %event.category, "{}", event.message);
                        }
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Error log lagged behind");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
