//! Sensor bridge - MQTT telemetry ingestion and HTTP query service
//!
//! Subscribes to temperature, humidity and soil moisture topics, corrects each
//! reading, stores it, and serves the latest readings and the rolling median
//! over HTTP.

pub mod api;
pub mod bus;
pub mod channel;
pub mod config;
pub mod correction;
pub mod dispatcher;
pub mod error;
pub mod localtime;
pub mod median;
pub mod query;
pub mod store;

pub use config::{load_config, Config};
pub use error::{BridgeError, Result};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::MqttSource;
use crate::channel::TopicMap;
use crate::correction::Corrector;
use crate::dispatcher::Dispatcher;
use crate::localtime::Localizer;
use crate::median::MedianAggregator;
use crate::query::QueryService;
use crate::store::{LocalStore, ReadingStore};

/// Run the sensor bridge with the given configuration
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let localizer = Localizer::new(&config.query.timezone)?;
    tracing::info!("Serving timestamps in {}", localizer.timezone());
    let retry = config.store.retry_policy();
    let cancel = CancellationToken::new();

    // Build the store
    let store: Arc<dyn ReadingStore> = match &config.store.journal {
        Some(path) => Arc::new(LocalStore::open(path).await?),
        None => {
            tracing::warn!("No journal configured, readings are kept in memory only");
            Arc::new(LocalStore::in_memory())
        }
    };

    // The same aggregator serves the ingestion fallback and the read path
    let aggregator = MedianAggregator::new(config.median.window);

    let topics = TopicMap::new(&config.bus.topics);
    let dispatcher = Dispatcher::new(
        topics.clone(),
        Corrector::new(config.correction),
        aggregator,
        Arc::clone(&store),
        retry,
    )
    .with_median_persistence(config.median.persist);

    let query = Arc::new(
        QueryService::new(Arc::clone(&store), aggregator, localizer, retry)
            .with_temperature_view(config.query.temperature_view)
            .with_history_size(config.query.history_size),
    );

    // Setup shutdown handler
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
        cancel_for_signal.cancel();
    });

    // Start the HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        BridgeError::Config(format!(
            "Failed to bind HTTP server to port {}: {}",
            config.server.port, e
        ))
    })?;
    tracing::info!("HTTP server listening on http://{}", addr);

    let router = api::build_router(query);
    let cancel_for_server = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_for_server.cancelled().await;
            })
            .await
            .ok();
        tracing::debug!("HTTP server stopped");
    });

    // Ingest until cancelled
    tracing::info!(
        "Connecting to MQTT broker {}:{}",
        config.bus.host,
        config.bus.port
    );
    let mut source = MqttSource::new(&config.bus, topics.topics());
    bus::run_ingestion(&mut source, &dispatcher, cancel.clone()).await;

    source.disconnect().await;
    cancel.cancel();
    if let Err(e) = server.await {
        tracing::warn!("HTTP server task failed: {}", e);
    }
    tracing::info!("Sensor bridge stopped");

    Ok(())
}
