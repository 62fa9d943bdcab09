/// Overlay network integration
///
/// The overlay network runs as a separate process. This module only drives it:
/// - `OverlayLauncher` starts a process inside a private data directory
/// - `OverlayNetwork` waits for it, publishes and withdraws services, stops it
/// - `Bootstrapper` sequences those steps under a deadline and owns teardown
///
/// `TorLauncher` is the production implementation, talking to `tor` over its
/// control port.

pub mod bootstrap;
pub mod control;
pub mod tor;

pub use bootstrap::{BootstrapError, BootstrapState, Bootstrapper, PublishedService};
pub use control::{ControlConnection, ControlError, Reply};
pub use tor::{TorLauncher, TorProcess};

use crate::identity::KeyPair;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::Path;

/// Starts overlay network processes
#[async_trait]
pub trait OverlayLauncher: Send + Sync {
    type Network: OverlayNetwork + 'static;

    /// Launch a process that keeps all of its state under `data_dir`
    async fn launch(&self, data_dir: &Path) -> Result<Self::Network, NetworkError>;
}

/// A running overlay network process
#[async_trait]
pub trait OverlayNetwork: Send {
    /// Resolve once the process accepts commands
    async fn wait_ready(&mut self) -> Result<(), NetworkError>;

    /// Publish a service for `keypair` that forwards `remote_port` to `target`.
    ///
    /// Returns the service id the network registered.
    async fn publish(
        &mut self,
        keypair: &KeyPair,
        remote_port: u16,
        target: SocketAddr,
    ) -> Result<String, NetworkError>;

    /// Withdraw a published service
    async fn unpublish(&mut self, service_id: &str) -> Result<(), NetworkError>;

    /// Stop the process. Safe to call more than once.
    async fn close(&mut self) -> Result<(), NetworkError>;
}

/// Errors reported by the overlay network process
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to spawn network process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Network process exited: {0}")]
    Exited(String),

    #[error("Network cancelled the request: {0}")]
    Cancelled(String),

    #[error("Network is not ready")]
    NotReady,

    #[error("Control protocol error: {0}")]
    Control(#[from] ControlError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
