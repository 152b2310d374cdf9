use anyhow::Result;
use fleetpulse_api::{create_router, AppState};
use fleetpulse_core::Config;
use fleetpulse_hub::IngestPipeline;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Grace period for the bridge task after cancellation
const BRIDGE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FleetPulseServer {
    config: Config,
    pipeline: IngestPipeline,
    pool: Option<PgPool>,
    bridge: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl FleetPulseServer {
    pub const fn new(
        config: Config,
        pipeline: IngestPipeline,
        pool: Option<PgPool>,
        bridge: Option<JoinHandle<()>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            pipeline,
            pool,
            bridge,
            shutdown,
        }
    }

    /// Serve HTTP until SIGINT/SIGTERM, then shut everything down
    pub async fn run(self) -> Result<()> {
        let address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP server to {address}: {e}"))?;
        info!("HTTP server listening on {}", address);

        let state = AppState::new(&self.config, self.pipeline.clone(), self.shutdown.clone());
        let router = create_router(state, self.config.server.max_body_bytes);

        let shutdown = self.shutdown.clone();
        let serve_result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, starting graceful shutdown...");
                // Streams hold their connections open until this fires
                shutdown.cancel();
            })
            .await;

        if let Err(e) = &serve_result {
            error!("HTTP server error: {}", e);
        }

        self.stop().await;
        serve_result.map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
    }

    async fn stop(self) {
        info!("Shutting down FleetPulse server...");
        self.shutdown.cancel();

        if let Some(handle) = self.bridge {
            match tokio::time::timeout(BRIDGE_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Broker bridge stopped"),
                Ok(Err(e)) => error!("Broker bridge task failed: {}", e),
                Err(_) => warn!(
                    "Broker bridge did not stop within {}s",
                    BRIDGE_STOP_TIMEOUT.as_secs()
                ),
            }
        }

        let remaining = self.pipeline.hub().observer_count();
        if remaining > 0 {
            warn!("{} observer(s) still registered at shutdown", remaining);
        }

        if let Some(pool) = self.pool {
            pool.close().await;
            info!("Database pool closed");
        }

        info!("FleetPulse server stopped");
    }
}

async fn shutdown_signal() {
    let ctrl_c = wait_for_signal("Ctrl+C", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = wait_for_signal("SIGTERM", async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        signal.recv().await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Resolve once the signal arrives. A handler that cannot be installed
/// never resolves, so the other signal still decides shutdown.
async fn wait_for_signal<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Received {} signal", name),
        Err(e) => {
            error!("Failed to install {} handler: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_handler_install_never_resolves() {
        let failed = wait_for_signal("test", async {
            Err::<(), _>(std::io::Error::other("unsupported"))
        });

        let result = tokio::time::timeout(Duration::from_millis(100), failed).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delivered_signal_resolves() {
        let delivered = wait_for_signal("test", async { Ok(()) });

        let result = tokio::time::timeout(Duration::from_millis(100), delivered).await;
        assert!(result.is_ok());
    }
}
