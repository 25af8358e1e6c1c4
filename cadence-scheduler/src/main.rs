use anyhow::Context;
use cadence_client::{HttpEmbedder, HttpObjectStore, HttpTrainingClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod limiter;
pub mod lock;
pub mod manager;
pub mod pipeline;
pub mod store;
pub mod watch;
pub mod watchers;

use config::Config;
use limiter::RateLimiter;
use lock::{Locker, PgLeaseBackend};
use pipeline::{PIPELINE_WATCHER, PipelineWatcher};
use store::{PgStore, Store};
use watch::{OrchestratorSettings, SharedConfig, WatchOrchestrator, WatcherRegistry};
use watchers::{
    HistoryPruner, PRUNER_WATCHER, RECONCILER_WATCHER, STATUS_SYNC_WATCHER, ScheduleReconciler,
    StatusSynchronizer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_scheduler=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Cadence Scheduler...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));

    let shared = Arc::new(SharedConfig {
        object_store: Arc::new(HttpObjectStore::new(config.object_store_url.clone())),
        embedder: Arc::new(HttpEmbedder::new(config.embedder_url.clone())),
        trainer: Arc::new(HttpTrainingClient::new(config.trainer_url.clone())),
        train_limiter: RateLimiter::new(config.train_qps, config.train_burst),
        embedding_model: config.embedding_model.clone(),
        job_timeout: config.job_timeout,
        spawn_ceiling: config.cron_spawn_ceiling,
    });

    let locker = Locker::new(
        Arc::new(PgLeaseBackend::new(pool)),
        config.lock_ttl,
        config.lock_refresh_interval,
    );
    tracing::info!("Scheduler instance {}", locker.holder());

    let registry = Arc::new(WatcherRegistry::new());
    registry.register(
        PIPELINE_WATCHER,
        Arc::new(PipelineWatcher::new(config.pipeline_spec.clone())),
    );
    registry.register(RECONCILER_WATCHER, Arc::new(ScheduleReconciler::new()));
    registry.register(PRUNER_WATCHER, Arc::new(HistoryPruner::new()));
    registry.register(STATUS_SYNC_WATCHER, Arc::new(StatusSynchronizer::new()));
    let names: Vec<String> = registry
        .list_watchers()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    tracing::info!("Registered watchers: {}", names.join(", "));

    let orchestrator = WatchOrchestrator::new(
        OrchestratorSettings::from(&config),
        registry,
        locker,
        store,
        shared,
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    orchestrator.run(shutdown).await;

    tracing::info!("Cadence Scheduler stopped");
    Ok(())
}
