use super::Server;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Plain HTTP listener for local development. Never touches the service key
/// or the overlay network.
pub struct LocalServer {
    listener: TcpListener,
    app: Router,
}

impl LocalServer {
    /// Bind `addr` now; serving starts in `listen_and_serve`
    pub async fn bind(addr: SocketAddr, app: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot listen on {}", addr))?;
        Ok(Self { listener, app })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Server for LocalServer {
    async fn listen_and_serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let addr = self.listener.local_addr()?;
        info!("Local server listening on {}", addr);
        println!("http://{}/", addr);

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("local listener failed")
    }
}
