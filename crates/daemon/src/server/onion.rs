use super::Server;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::Router;
use onionserve_core::{obtain_identity, Bootstrapper, OverlayLauncher};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serves `app` as an onion service under the key stored at `key_path`
pub struct OnionServer<L: OverlayLauncher> {
    key_path: PathBuf,
    bootstrapper: Bootstrapper<L>,
    listen_timeout: Duration,
    app: Router,
}

impl<L: OverlayLauncher> OnionServer<L> {
    pub fn new(
        key_path: PathBuf,
        bootstrapper: Bootstrapper<L>,
        listen_timeout: Duration,
        app: Router,
    ) -> Self {
        Self {
            key_path,
            bootstrapper,
            listen_timeout,
            app,
        }
    }
}

#[async_trait]
impl<L: OverlayLauncher + 'static> Server for OnionServer<L> {
    async fn listen_and_serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let OnionServer {
            key_path,
            mut bootstrapper,
            listen_timeout,
            app,
        } = *self;

        let identity = obtain_identity(&key_path)
            .with_context(|| format!("cannot obtain service key {}", key_path.display()))?;
        info!(address = %identity.address(), "Service identity ready");

        let mut service = bootstrapper
            .publish(&identity, listen_timeout, &shutdown)
            .await?;

        let Some(listener) = service.take_listener() else {
            service.close().await;
            return Err(anyhow!("published service has no listener"));
        };

        println!("server listening at {}", service.address().url());

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        // axum has dropped the listener by now
        service.close().await;
        served.context("onion listener failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use onionserve_core::{BootstrapError, KeyPair, NetworkError, OnionAddress, OverlayNetwork};
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Starts, but never becomes ready
    struct StalledLauncher;
    struct StalledNetwork;

    #[async_trait]
    impl OverlayLauncher for StalledLauncher {
        type Network = StalledNetwork;

        async fn launch(&self, _data_dir: &Path) -> Result<StalledNetwork, NetworkError> {
            Ok(StalledNetwork)
        }
    }

    #[async_trait]
    impl OverlayNetwork for StalledNetwork {
        async fn wait_ready(&mut self) -> Result<(), NetworkError> {
            std::future::pending().await
        }

        async fn publish(
            &mut self,
            _keypair: &KeyPair,
            _remote_port: u16,
            _target: SocketAddr,
        ) -> Result<String, NetworkError> {
            Err(NetworkError::NotReady)
        }

        async fn unpublish(&mut self, _service_id: &str) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    /// Publishes whatever it is asked to and records what happens to it
    #[derive(Default)]
    struct Recorder {
        data_dir: Mutex<Option<PathBuf>>,
        target: Mutex<Option<SocketAddr>>,
        unpublished: AtomicBool,
        closed: AtomicBool,
    }

    struct HealthyLauncher(Arc<Recorder>);
    struct HealthyNetwork(Arc<Recorder>);

    #[async_trait]
    impl OverlayLauncher for HealthyLauncher {
        type Network = HealthyNetwork;

        async fn launch(&self, data_dir: &Path) -> Result<HealthyNetwork, NetworkError> {
            *self.0.data_dir.lock().unwrap() = Some(data_dir.to_path_buf());
            Ok(HealthyNetwork(self.0.clone()))
        }
    }

    #[async_trait]
    impl OverlayNetwork for HealthyNetwork {
        async fn wait_ready(&mut self) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn publish(
            &mut self,
            keypair: &KeyPair,
            _remote_port: u16,
            target: SocketAddr,
        ) -> Result<String, NetworkError> {
            *self.0.target.lock().unwrap() = Some(target);
            Ok(OnionAddress::from_public_key(&keypair.public_key()).service_id())
        }

        async fn unpublish(&mut self, _service_id: &str) -> Result<(), NetworkError> {
            self.0.unpublished.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), NetworkError> {
            self.0.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stalled_server(
        key_path: PathBuf,
        listen_timeout: Duration,
    ) -> Box<OnionServer<StalledLauncher>> {
        Box::new(OnionServer::new(
            key_path,
            Bootstrapper::new(StalledLauncher),
            listen_timeout,
            Router::new(),
        ))
    }

    #[tokio::test]
    async fn test_shutdown_while_serving_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("onion.pk");
        let recorder = Arc::new(Recorder::default());
        let server = OnionServer::new(
            key_path.clone(),
            Bootstrapper::new(HealthyLauncher(recorder.clone())),
            Duration::from_secs(5),
            crate::site::router(&dir.path().join(crate::site::INDEX_FILE)),
        );

        let (up_tx, up_rx) = tokio::sync::oneshot::channel::<()>();
        let watcher = recorder.clone();
        let run = tokio::spawn(Lifecycle::new(Box::new(server)).run(async move {
            // stop once the service is published and answering
            loop {
                let target = *watcher.target.lock().unwrap();
                if let Some(target) = target {
                    if tokio::net::TcpStream::connect(target).await.is_ok() {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = up_tx.send(());
        }));

        tokio::time::timeout(Duration::from_secs(5), up_rx)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(key_path.exists());
        assert!(recorder.unpublished.load(Ordering::SeqCst));
        assert!(recorder.closed.load(Ordering::SeqCst));
        let data_dir = recorder.data_dir.lock().unwrap().clone().unwrap();
        assert!(!data_dir.exists());
    }

    #[tokio::test]
    async fn test_times_out_when_network_never_ready() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("onion.pk");
        let server = stalled_server(key_path.clone(), Duration::from_secs(1));

        let err = server
            .listen_and_serve(CancellationToken::new())
            .await
            .unwrap_err();

        let bootstrap = err.downcast_ref::<BootstrapError>().unwrap();
        assert!(bootstrap.is_timeout());
        // The key is obtained before the network is started
        assert!(key_path.exists());
    }

    #[tokio::test]
    async fn test_shutdown_during_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let server = stalled_server(dir.path().join("onion.pk"), Duration::from_secs(60));

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.listen_and_serve(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootstrapError>(),
            Some(BootstrapError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_key_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("onion.pk");
        std::fs::write(&key_path, "not a key").unwrap();
        let server = stalled_server(key_path, Duration::from_secs(60));

        let err = server
            .listen_and_serve(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<BootstrapError>().is_none());
        assert!(err.to_string().contains("cannot obtain service key"));
    }
}
