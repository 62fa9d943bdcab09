/// Onion service bootstrap
///
/// Brings the overlay network up and publishes one service on it:
///
/// ```text
/// Idle -> NetworkStarting -> NetworkReady -> ServicePublishing -> ServicePublished
///              \                  \                  \
///               +------------------+------------------+--> Failed
/// ```
///
/// Network readiness and publication share one deadline. Whatever the outcome,
/// nothing outlives a failed bootstrap: the network is closed and its data
/// directory removed before the error is returned.

use super::{NetworkError, OverlayLauncher, OverlayNetwork};
use crate::identity::Identity;
use crate::service::OnionAddress;
use onionserve_common::service::DEFAULT_REMOTE_PORT;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a bootstrap currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    NetworkStarting,
    NetworkReady,
    ServicePublishing,
    ServicePublished,
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::NetworkStarting => "network starting",
            Self::NetworkReady => "network ready",
            Self::ServicePublishing => "service publishing",
            Self::ServicePublished => "service published",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// About thirty years, as tokio uses for its own far-future deadlines
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;

/// Publishes an onion service on a freshly launched overlay network
pub struct Bootstrapper<L: OverlayLauncher> {
    launcher: L,
    remote_port: u16,
    bind_addr: SocketAddr,
    state: BootstrapState,
}

impl<L: OverlayLauncher> Bootstrapper<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            remote_port: DEFAULT_REMOTE_PORT,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            state: BootstrapState::Idle,
        }
    }

    /// Port advertised on the onion address (default 80)
    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Launch the network and publish `identity` on it.
    ///
    /// Readiness plus publication must finish within `listen_timeout`.
    /// `cancel` aborts the attempt early (the caller is shutting down).
    pub async fn publish(
        &mut self,
        identity: &Identity,
        listen_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PublishedService<L::Network>, BootstrapError> {
        self.transition(BootstrapState::NetworkStarting);

        let data_dir = tempfile::Builder::new()
            .prefix("data-dir")
            .tempdir()
            .map_err(|e| self.fail(BootstrapError::DataDir(e)))?;

        println!("Starting and registering onion service, please wait a couple of minutes...");

        let mut network = match self.launcher.launch(data_dir.path()).await {
            Ok(network) => network,
            Err(e) => return Err(self.fail(BootstrapError::NetworkStart(e))),
        };

        let deadline = deadline_after(listen_timeout);
        match self
            .bring_up(&mut network, identity, deadline, listen_timeout, cancel)
            .await
        {
            Ok(listener) => {
                self.transition(BootstrapState::ServicePublished);
                Ok(PublishedService {
                    listener: Some(listener),
                    address: *identity.address(),
                    network,
                    data_dir,
                })
            }
            Err(e) => {
                let e = self.fail(e);
                teardown(&mut network, None, data_dir).await;
                Err(e)
            }
        }
    }

    async fn bring_up(
        &mut self,
        network: &mut L::Network,
        identity: &Identity,
        deadline: Instant,
        listen_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TcpListener, BootstrapError> {
        bounded(network.wait_ready(), deadline, listen_timeout, cancel, self.state)
            .await?
            .map_err(BootstrapError::NetworkStart)?;
        self.transition(BootstrapState::NetworkReady);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(BootstrapError::Bind)?;
        let target = listener.local_addr().map_err(BootstrapError::Bind)?;

        self.transition(BootstrapState::ServicePublishing);
        let expected = identity.address().service_id();
        debug!("Publishing {} -> {}", expected, target);

        let reported = bounded(
            network.publish(identity.keypair(), self.remote_port, target),
            deadline,
            listen_timeout,
            cancel,
            self.state,
        )
        .await?
        .map_err(|e| match e {
            NetworkError::Cancelled(reason) => BootstrapError::Cancelled(reason),
            other => BootstrapError::Publish(other),
        })?;

        if reported != expected {
            if let Err(e) = network.unpublish(&reported).await {
                warn!("Failed to withdraw mismatched service {}: {}", reported, e);
            }
            return Err(BootstrapError::AddressMismatch { expected, reported });
        }

        Ok(listener)
    }

    fn transition(&mut self, next: BootstrapState) {
        debug!("Bootstrap: {} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, error: BootstrapError) -> BootstrapError {
        warn!("Bootstrap failed while {}: {}", self.state, error);
        self.transition(BootstrapState::Failed);
        error
    }
}

/// `now + timeout`, saturating at a far-future instant for absurdly long timeouts
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Run a network step against the shared deadline and the caller's cancel token
async fn bounded<T>(
    step: impl Future<Output = Result<T, NetworkError>>,
    deadline: Instant,
    listen_timeout: Duration,
    cancel: &CancellationToken,
    state: BootstrapState,
) -> Result<Result<T, NetworkError>, BootstrapError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(BootstrapError::Cancelled("shutdown requested".into())),
        result = timeout_at(deadline, step) => {
            result.map_err(|_| BootstrapError::Timeout { state, after: listen_timeout })
        }
    }
}

/// Close the listener, withdraw the service, stop the network, remove its data.
///
/// Errors are logged; teardown always runs to the end.
async fn teardown<N: OverlayNetwork>(
    network: &mut N,
    published: Option<&str>,
    data_dir: TempDir,
) {
    if let Some(service_id) = published {
        if let Err(e) = network.unpublish(service_id).await {
            warn!("Failed to withdraw onion service: {}", e);
        }
    }

    if let Err(e) = network.close().await {
        warn!("Failed to stop network process: {}", e);
    }

    let path = data_dir.path().to_path_buf();
    if let Err(e) = data_dir.close() {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

/// A published onion service and the session keeping it alive
///
/// Field order is drop order: listener, then network, then data directory.
pub struct PublishedService<N: OverlayNetwork> {
    listener: Option<TcpListener>,
    address: OnionAddress,
    network: N,
    data_dir: TempDir,
}

impl<N: OverlayNetwork> PublishedService<N> {
    /// Address the service was published under
    pub fn address(&self) -> &OnionAddress {
        &self.address
    }

    /// Local end of the published listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Hand the listener to an accept loop. Returns `None` after the first call.
    pub fn take_listener(&mut self) -> Option<TcpListener> {
        self.listener.take()
    }

    /// Tear the session down: listener first, then the service, the network
    /// process and its data directory.
    pub async fn close(mut self) {
        drop(self.listener.take());

        let service_id = self.address.service_id();
        teardown(&mut self.network, Some(&service_id), self.data_dir).await;
        info!("Onion service {} stopped", self.address);
    }
}

/// Bootstrap errors
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Cannot create network data directory: {0}")]
    DataDir(#[source] std::io::Error),

    #[error("Network start failure: {0}")]
    NetworkStart(#[source] NetworkError),

    #[error("Cannot bind local listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Unable to create onion service: {0}")]
    Publish(#[source] NetworkError),

    #[error("Publish timeout: no onion service after {after:?} ({state})")]
    Timeout {
        state: BootstrapState,
        after: Duration,
    },

    #[error("Publish cancelled: {0}")]
    Cancelled(String),

    #[error("Network published {reported}, expected {expected}")]
    AddressMismatch { expected: String, reported: String },
}

impl BootstrapError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
