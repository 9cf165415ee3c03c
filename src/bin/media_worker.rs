//! # Media Cleanup Worker
//!
//! Standalone consumer that reclaims the media of deleted posts.
//!
//! ## Usage
//!
//! ```bash
//! # Development defaults (config/coherence.toml if present)
//! cargo run --bin media-worker
//!
//! # Production overrides
//! COHERENCE_ENV=production COHERENCE__BROKER__URL=amqp://... cargo run --bin media-worker
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use coherence_core::config::{redact_url, ConfigManager};
use coherence_core::database::DatabaseConnection;
use coherence_core::logging;
use coherence_core::media::{object_store, MediaCleanup, MediaCleanupWorker, PgMediaStore};
use coherence_core::messaging::{BrokerProvider, ReconnectBackoff};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("Failed to load configuration")?;
    let config = manager.config();
    logging::init_structured_logging(&config.logging);

    info!("🚀 Starting media cleanup worker");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());
    info!("   Broker: {}", redact_url(&config.broker.url));
    info!(
        "   Subscription: {} / {} on queue {:?}",
        config.media_worker.exchange, config.media_worker.routing_key, config.media_worker.queue_name
    );

    let database = DatabaseConnection::connect(&config.database)
        .await
        .context("Failed to connect to the media database")?;
    let objects = object_store::from_config(&config.object_store);
    info!("   Object store: {}", objects.name());

    let cleanup = MediaCleanup::new(Arc::new(PgMediaStore::new(database.pool().clone())), objects);
    let broker = Arc::new(BrokerProvider::from_config(&config.broker));
    let worker = MediaCleanupWorker::new(
        broker,
        cleanup,
        &config.media_worker,
        ReconnectBackoff::from(&config.broker.reconnect),
    );

    info!("   Press Ctrl+C to shutdown gracefully");
    worker.run(shutdown_signal()).await;

    database.close().await;
    info!("👋 Media cleanup worker shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Ctrl+C received"),
        _ = terminate => info!("🛑 SIGTERM received"),
    }
}
