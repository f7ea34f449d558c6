//! LTP Ingestor Binary
//!
//! Starts the index and option price ingestion pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ltp-ingestor
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MQTT_HOST`: Broker host
//! - `DATABASE_URL`: `PostgreSQL` URL (unless `LTP_STORE=memory`)
//!
//! ## Optional
//! - `MQTT_PORT` (1883; 8883 selects TLS), `MQTT_CLIENT_ID`, `MQTT_USERNAME`, `MQTT_PASSWORD`
//! - `LTP_STORE`: postgres | memory (default: postgres)
//! - `LTP_INDICES`: Comma-separated indices (default: NIFTY,BANKNIFTY,FINNIFTY,MIDCPNIFTY)
//! - `LTP_EXPIRY_<INDEX>`: Contract expiry used for option lookups
//! - `LTP_BATCH_SIZE`, `LTP_BATCH_INTERVAL_MS`, `LTP_FLUSH_MAX_ATTEMPTS`, `LTP_STRIKE_RANGE`
//! - `TOKEN_RESOLVER_URL`, `TOKEN_RESOLVER_TIMEOUT_MS`
//! - `LTP_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ltp_ingestor::application::ports::{TickStore, TopicStore};
use ltp_ingestor::infrastructure::health::{HealthServer, HealthServerState};
use ltp_ingestor::infrastructure::mqtt::{BrokerEvent, MqttBrokerClient, MqttClientConfig};
use ltp_ingestor::infrastructure::persistence::{InMemoryTickStore, PgTickStore};
use ltp_ingestor::infrastructure::resolver::HttpContractResolver;
use ltp_ingestor::infrastructure::scheduler::TokioScheduler;
use ltp_ingestor::infrastructure::telemetry;
use ltp_ingestor::{
    ActiveSubscriptionSet, AtmTracker, BatchWriter, Ingestor, IngestorConfig, StoreBackend,
    SubscriptionExpander, TopicCache, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound on the final flush at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting LTP ingestor");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = IngestorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Store
    let (tick_store, topic_store, pg_store) = match &config.store.backend {
        StoreBackend::Postgres { url } => {
            let store = Arc::new(
                PgTickStore::connect(url, config.store.max_connections)
                    .await
                    .context("failed to connect to PostgreSQL")?,
            );
            if config.store.ensure_schema {
                store.ensure_schema().await.context("failed to create schema")?;
            }
            let ticks: Arc<dyn TickStore> = store.clone();
            let topics: Arc<dyn TopicStore> = store.clone();
            (ticks, topics, Some(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; ticks will not survive a restart");
            let store = Arc::new(InMemoryTickStore::new());
            let ticks: Arc<dyn TickStore> = store.clone();
            let topics: Arc<dyn TopicStore> = store;
            (ticks, topics, None)
        }
    };

    // Broker
    let (event_tx, event_rx) = mpsc::channel::<BrokerEvent>(config.broker.event_buffer.max(1));
    let (broker, event_loop) = MqttBrokerClient::new(
        &MqttClientConfig::from_settings(&config.broker),
        event_tx,
        shutdown_token.clone(),
    );

    // Pipeline
    let resolver = Arc::new(
        HttpContractResolver::new(config.resolver.url.clone(), config.resolver.timeout)
            .context("failed to build contract resolver")?,
    );
    let table = config.pipeline.strike_table();
    let scheme = config.pipeline.topic_scheme();
    let tracker = Arc::new(AtmTracker::new(table.clone()));
    let expander = Arc::new(SubscriptionExpander::new(
        resolver,
        Arc::clone(&broker) as _,
        Arc::new(ActiveSubscriptionSet::new()),
        table,
        scheme.clone(),
        config.pipeline.expander_settings(),
    ));
    let writer = BatchWriter::new(
        config.pipeline.batch_settings(),
        tick_store,
        Arc::new(TopicCache::new(topic_store)),
        Arc::new(TokioScheduler::new()),
    );
    let ingestor = Arc::new(Ingestor::new(
        scheme,
        tracker,
        expander,
        Arc::clone(&writer),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&ingestor),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::clone(&health_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Broker event handler
    let handler = tokio::spawn(handle_broker_events(
        event_rx,
        Arc::clone(&ingestor),
        Arc::clone(&health_state),
        config.pipeline.indices.clone(),
    ));

    // Broker event loop; giving up on the broker stops the process.
    let loop_shutdown = shutdown_token.clone();
    let event_loop_handle = tokio::spawn(async move {
        if let Err(e) = event_loop.run().await {
            tracing::error!(error = %e, "MQTT event loop stopped");
            loop_shutdown.cancel();
        }
    });

    tracing::info!("LTP ingestor ready");

    await_shutdown(&shutdown_token).await;

    broker.disconnect().await;
    let _ = event_loop_handle.await;
    // The event channel closes once the loop is gone.
    let _ = handler.await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.drain()).await {
        Ok(stats) => tracing::info!(
            rows_written = stats.rows_written,
            rows_dropped = stats.rows_dropped,
            flushes_failed = stats.flushes_failed,
            pending = stats.pending,
            "Final flush complete"
        ),
        Err(_) => tracing::error!(
            pending = writer.pending(),
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Final flush timed out; buffered ticks lost"
        ),
    }

    if let Some(store) = pg_store {
        store.close().await;
    }

    tracing::info!(stats = ?ingestor.stats(), "LTP ingestor stopped");
    Ok(())
}

/// Dispatch broker events to the pipeline.
///
/// The first `Connected` subscribes the configured indices; later ones
/// re-issue every active subscription.
async fn handle_broker_events(
    mut rx: mpsc::Receiver<BrokerEvent>,
    ingestor: Arc<Ingestor>,
    health: Arc<HealthServerState>,
    indices: Vec<String>,
) {
    let mut bootstrapped = false;

    while let Some(event) = rx.recv().await {
        match event {
            BrokerEvent::Message { topic, payload } => {
                let _ = ingestor.handle_message(&topic, &payload);
            }
            BrokerEvent::Connected => {
                health.mark_connected();
                let ingestor = Arc::clone(&ingestor);
                if bootstrapped {
                    let indices = indices.clone();
                    tokio::spawn(async move {
                        ingestor.resubscribe().await;
                        // Indices whose first subscribe failed were released.
                        ingestor.bootstrap(&indices).await;
                    });
                } else {
                    bootstrapped = true;
                    let indices = indices.clone();
                    tokio::spawn(async move {
                        let subscribed = ingestor.bootstrap(&indices).await;
                        tracing::info!(subscribed, total = indices.len(), "Index topics subscribed");
                    });
                }
            }
            BrokerEvent::Disconnected => {
                health.mark_disconnected();
                tracing::warn!("Broker disconnected");
            }
            BrokerEvent::Reconnecting { attempt } => {
                health.mark_reconnecting(attempt);
                tracing::info!(attempt, "Broker reconnecting");
            }
            BrokerEvent::Error(msg) => {
                tracing::debug!(error = %msg, "Broker error");
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestorConfig) {
    tracing::info!(
        broker_host = %config.broker.host,
        broker_port = config.broker.port,
        client_id = %config.broker.client_id,
        store = ?config.store.backend,
        indices = ?config.pipeline.indices,
        batch_size = config.pipeline.batch_size,
        batch_interval_ms = config.pipeline.batch_interval.as_millis(),
        strike_range = config.pipeline.strike_range,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for index in &config.pipeline.indices {
        if !config.pipeline.expiries.contains_key(index) {
            tracing::warn!(index = %index, "No expiry configured; option legs will not resolve");
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT, SIGTERM, or an internal shutdown request.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
