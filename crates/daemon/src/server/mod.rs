/// HTTP servers
///
/// A process runs exactly one server, chosen from configuration:
/// - `LocalServer` listens on a plain local address (development)
/// - `OnionServer` loads the service key, publishes through Tor and serves there

mod local;
mod onion;

pub use local::LocalServer;
pub use onion::OnionServer;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use onionserve_common::{ServeMode, ServiceConfig};
use onionserve_core::{Bootstrapper, TorLauncher};
use tokio_util::sync::CancellationToken;

/// Accepts connections and dispatches them to a handler until `shutdown`
/// fires or the accept loop fails
#[async_trait]
pub trait Server: Send + 'static {
    async fn listen_and_serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Build the server selected by `config.mode`
pub async fn from_config(config: &ServiceConfig, app: Router) -> Result<Box<dyn Server>> {
    match config.mode {
        ServeMode::Dev => Ok(Box::new(LocalServer::bind(config.local_addr, app).await?)),
        ServeMode::Onion => {
            let mut launcher = TorLauncher::new(&config.tor_binary);
            if !config.quiet {
                launcher = launcher.verbose();
            }
            let bootstrapper = Bootstrapper::new(launcher).with_remote_port(config.remote_port);

            Ok(Box::new(OnionServer::new(
                config.key_path.clone(),
                bootstrapper,
                config.listen_timeout(),
                app,
            )))
        }
    }
}
