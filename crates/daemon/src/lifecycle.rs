/// Process lifecycle
///
/// Runs one server to completion, or until a shutdown signal arrives. Either
/// way the server's own teardown finishes before `run` returns.

use crate::server::Server;
use anyhow::{anyhow, Result};
use std::future::Future;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Lifecycle {
    server: Box<dyn Server>,
}

impl Lifecycle {
    pub fn new(server: Box<dyn Server>) -> Self {
        Self { server }
    }

    /// Serve until the server stops or `shutdown_signal` resolves.
    ///
    /// A server error is returned as is. A shutdown signal is a clean exit.
    pub async fn run<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let shutdown = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        let server = self.server;
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let _ = done_tx.send(server.listen_and_serve(token).await);
        });

        let outcome = tokio::select! {
            result = done_rx => match result {
                Ok(Ok(())) => {
                    info!("Server stopped");
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(anyhow!("server task ended without a result")),
            },
            _ = shutdown_signal => {
                info!("Shutdown signal received");
                shutdown.cancel();
                Ok(())
            }
        };

        if let Err(e) = task.await {
            warn!("Server task failed: {}", e);
        }

        outcome
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
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
