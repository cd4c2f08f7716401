// Linkeval ingestion server
// Decision: one process hosts the HTTP API, the scheduler actors and the timer loop

use std::sync::Arc;

use anyhow::{Context, Result};
use linkeval_scheduler::{
    HttpWorkflowTrigger, InMemoryStateStore, PostgresStateStore, SchedulerHost, StateStore,
    TimerStore, TokioTimerService,
};
use linkeval_server::telemetry::{init_telemetry, TelemetryConfig};
use linkeval_server::{router, AppState, ServerConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let telemetry_config = TelemetryConfig::from_env();
    init_telemetry(&telemetry_config);

    tracing::info!(service = %telemetry_config.service_name, "linkeval-server starting...");

    let config = ServerConfig::from_env()?;

    let (store, timer_store): (Arc<dyn StateStore>, Arc<dyn TimerStore>) =
        match &config.database_url {
            Some(url) => {
                let store = PostgresStateStore::connect(url)
                    .await
                    .context("Failed to connect to database")?;
                store
                    .migrate()
                    .await
                    .context("Failed to run migrations")?;
                tracing::info!("Connected to database");
                let store = Arc::new(store);
                (store.clone() as Arc<dyn StateStore>, store as Arc<dyn TimerStore>)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, scheduler state is kept in memory");
                let store = Arc::new(InMemoryStateStore::new());
                (store.clone() as Arc<dyn StateStore>, store as Arc<dyn TimerStore>)
            }
        };

    let trigger = HttpWorkflowTrigger::new(&config.workflow_trigger_url, config.trigger_timeout)
        .context("Failed to build workflow trigger client")?;
    tracing::info!(
        endpoint = %trigger.endpoint(),
        timeout_secs = config.trigger_timeout.as_secs(),
        "Using HTTP workflow trigger"
    );

    let (timers, fired) = TokioTimerService::with_store(timer_store);
    let timers = Arc::new(timers);
    let restored = timers
        .restore()
        .await
        .context("Failed to restore pending timers")?;
    tracing::info!(restored, "Pending timers restored");

    tracing::info!(
        debounce_window_secs = config.scheduler.debounce_window.as_secs(),
        inbox_capacity = config.scheduler.inbox_capacity,
        max_attempts = config.scheduler.redelivery.max_attempts,
        idle_timeout_secs = config.scheduler.idle_timeout.as_secs(),
        "Scheduler configured"
    );

    let host = Arc::new(SchedulerHost::new(
        store,
        timers.clone(),
        Arc::new(trigger),
        config.scheduler.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let timer_loop = tokio::spawn(host.clone().run_timer_loop(fired, shutdown_rx));

    let app = router(AppState::new(host));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down scheduler");
    let _ = shutdown_tx.send(true);
    timers.shutdown();
    if let Err(e) = timer_loop.await {
        tracing::error!("Timer loop task failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
