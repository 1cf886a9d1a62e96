use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use segmentation_common::{Error, Result};
use segmentation_config::AppConfig;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::router::build_router;
use crate::state::AppState;

/// The HTTP server: binds the configured address and serves the API until
/// a shutdown signal arrives.
pub struct SegmentationServer {
    config: AppConfig,
}

impl SegmentationServer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Serve until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.http.addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("segmentation service listening on {}", addr);

        self.serve_until(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `signal` resolves, then give
    /// in-flight requests `http.shutdown_timeout_secs` to finish.
    pub async fn serve_until<S>(self, listener: TcpListener, signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let grace = Duration::from_secs(self.config.http.shutdown_timeout_secs);
        let state = Arc::new(AppState::open(self.config)?);
        let app = build_router(state);

        let stop = Arc::new(Notify::new());
        let server = axum::serve(listener, app).with_graceful_shutdown({
            let stop = Arc::clone(&stop);
            async move { stop.notified().await }
        });
        let mut handle = tokio::spawn(async move { server.await });

        tokio::select! {
            finished = &mut handle => {
                return flatten_server_result(finished);
            }
            _ = signal => {
                info!("shutdown signal received, draining connections");
            }
        }

        stop.notify_one();
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(finished) => flatten_server_result(finished)?,
            Err(_) => {
                warn!("graceful shutdown timed out after {}s", grace.as_secs());
                handle.abort();
            }
        }

        info!("server exiting");
        Ok(())
    }
}

fn flatten_server_result(
    finished: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match finished {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Gateway(format!("server error: {e}"))),
        Err(e) => Err(Error::Gateway(format!("server task failed: {e}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
