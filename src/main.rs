mod logging;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use pageforge::config::AppConfig;
use pageforge::placeholder::{EchoNormalizer, PlaceholderExtractor};
use pageforge::state::AppState;

use pageforge_engine::JobEngine;
use pageforge_progress::ProgressChannel;
use pageforge_resilience::CircuitBreaker;
use pageforge_scheduler::Scheduler;
use pageforge_store::{CreditLedger, SqliteStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = AppConfig::from_env();
    info!(bind_host = %config.bind_host, bind_port = config.bind_port, database_path = %config.database_path, "starting pageforge");

    let sqlite = SqliteStore::open(&config.database_path)
        .await
        .context("failed to open the SQLite store, or its migrations failed")?;
    let pool = sqlite.pool().clone();
    let store: Arc<dyn Store> = Arc::new(sqlite);

    let ledger = Arc::new(CreditLedger::new(pool, config.credit_overdraft_floor));
    let scheduler = Arc::new(Scheduler::spawn(config.scheduler_config()));
    let progress = Arc::new(ProgressChannel::new());
    let breaker = Arc::new(CircuitBreaker::new_default());

    let extractor = Arc::new(PlaceholderExtractor);
    let normalizer = Arc::new(EchoNormalizer);

    let engine = JobEngine::new(
        store.clone(),
        ledger.clone(),
        scheduler.clone(),
        progress.clone(),
        extractor,
        None,
        normalizer,
        breaker,
        config.engine_config(),
    );

    let watchdog_engine = engine.clone();
    tokio::spawn(async move {
        watchdog_engine.run_watchdogs().await;
    });

    let state = AppState { engine, store, ledger, progress, config: Arc::new(config.clone()) };
    let app = pageforge::api::router(state).layer(tower_http::trace::TraceLayer::new_for_http()).layer(
        tower_http::cors::CorsLayer::permissive(),
    );

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind the control API listener")?;
    info!(%addr, "pageforge control API listening");

    axum::serve(listener, app).await.context("control API server exited unexpectedly")?;
    Ok(())
}
