/// Tor process driver
///
/// Tor is started with networking disabled and a control port on an
/// ephemeral address. The control port address and the authentication cookie
/// are written into the data directory; readiness means both exist and the
/// cookie authenticates. Publishing enables networking, waits for bootstrap,
/// adds the onion service and waits for its descriptor to be uploaded.

use super::control::{ControlConnection, ControlError, Reply};
use super::{NetworkError, OverlayLauncher, OverlayNetwork};
use crate::identity::KeyPair;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use onionserve_common::tor::{POLL_INTERVAL_MILLIS, SHUTDOWN_GRACE_SECS};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const CONTROL_PORT_FILE: &str = "control-port";
const COOKIE_FILE: &str = "control_auth_cookie";

/// Launches `tor` processes
#[derive(Debug, Clone)]
pub struct TorLauncher {
    binary: PathBuf,
    quiet: bool,
}

impl TorLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            quiet: true,
        }
    }

    /// Keep tor's own log output on stdout
    pub fn verbose(mut self) -> Self {
        self.quiet = false;
        self
    }

    fn command(&self, data_dir: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--DataDirectory")
            .arg(data_dir)
            .args(["--ControlPort", "auto"])
            .arg("--ControlPortWriteToFile")
            .arg(data_dir.join(CONTROL_PORT_FILE))
            .args(["--CookieAuthentication", "1"])
            .arg("--CookieAuthFile")
            .arg(data_dir.join(COOKIE_FILE))
            .args(["--SocksPort", "auto"])
            .args(["--DisableNetwork", "1"])
            .arg("--__OwningControllerProcess")
            .arg(std::process::id().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.quiet {
            command
                .arg("--hush")
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        command
    }
}

#[async_trait]
impl OverlayLauncher for TorLauncher {
    type Network = TorProcess;

    async fn launch(&self, data_dir: &Path) -> Result<TorProcess, NetworkError> {
        let child = self.command(data_dir).spawn().map_err(NetworkError::Spawn)?;
        info!("Started tor (pid {:?})", child.id());

        Ok(TorProcess {
            child,
            control: None,
            port_file: data_dir.join(CONTROL_PORT_FILE),
            cookie_file: data_dir.join(COOKIE_FILE),
        })
    }
}

/// A running `tor` process and its control connection
pub struct TorProcess {
    child: Child,
    control: Option<ControlConnection>,
    port_file: PathBuf,
    cookie_file: PathBuf,
}

impl TorProcess {
    fn poll_interval() -> Duration {
        Duration::from_millis(POLL_INTERVAL_MILLIS)
    }

    fn check_running(&mut self) -> Result<(), NetworkError> {
        match self.child.try_wait()? {
            Some(status) => Err(NetworkError::Exited(status.to_string())),
            None => Ok(()),
        }
    }

    /// Control port address and cookie once tor has written both
    async fn control_files(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, NetworkError> {
        let port = match read_if_exists(&self.port_file).await? {
            Some(contents) => String::from_utf8_lossy(&contents).into_owned(),
            None => return Ok(None),
        };
        let Some(addr) = parse_port_file(&port) else {
            return Ok(None);
        };

        Ok(read_if_exists(&self.cookie_file).await?.map(|cookie| (addr, cookie)))
    }
}

#[async_trait]
impl OverlayNetwork for TorProcess {
    async fn wait_ready(&mut self) -> Result<(), NetworkError> {
        let (addr, cookie) = loop {
            self.check_running()?;
            if let Some(found) = self.control_files().await? {
                break found;
            }
            sleep(Self::poll_interval()).await;
        };

        let mut control = ControlConnection::connect(addr).await?;
        control
            .command(&format!("AUTHENTICATE {}", hex::encode(cookie)))
            .await
            .map_err(interrupted)?;
        control.command("TAKEOWNERSHIP").await.map_err(interrupted)?;
        control
            .command("RESETCONF __OwningControllerProcess")
            .await
            .map_err(interrupted)?;

        debug!("Tor control port ready at {}", addr);
        self.control = Some(control);
        Ok(())
    }

    async fn publish(
        &mut self,
        keypair: &KeyPair,
        remote_port: u16,
        target: SocketAddr,
    ) -> Result<String, NetworkError> {
        let poll_interval = Self::poll_interval();
        let control = self.control.as_mut().ok_or(NetworkError::NotReady)?;

        control
            .command("SETCONF DisableNetwork=0")
            .await
            .map_err(interrupted)?;

        let mut last_progress = None;
        loop {
            let reply = control
                .command("GETINFO status/bootstrap-phase")
                .await
                .map_err(interrupted)?;
            let progress = bootstrap_progress(&reply).unwrap_or(0);
            if progress >= 100 {
                break;
            }
            if last_progress != Some(progress) {
                info!("Tor bootstrapped {}%", progress);
                last_progress = Some(progress);
            }
            sleep(poll_interval).await;
        }

        control
            .command("SETEVENTS HS_DESC")
            .await
            .map_err(interrupted)?;

        let reply = control
            .command(&format!(
                "ADD_ONION ED25519-V3:{} Flags=DiscardPK Port={},{}",
                STANDARD.encode(keypair.expanded_secret()),
                remote_port,
                target
            ))
            .await
            .map_err(interrupted)?;
        let service_id = reply
            .value("ServiceID")
            .ok_or_else(|| ControlError::Malformed(reply.message().to_string()))?
            .to_string();

        debug!("Waiting for descriptor upload of {}", service_id);
        loop {
            let event = control.next_event().await.map_err(interrupted)?;
            match parse_hs_desc(event.message()) {
                Some(("UPLOADED", id)) if id == service_id => break,
                Some(("FAILED", id)) if id == service_id => {
                    debug!("Descriptor upload to one directory failed, tor retries")
                }
                _ => {}
            }
        }

        control.command("SETEVENTS").await.map_err(interrupted)?;
        Ok(service_id)
    }

    async fn unpublish(&mut self, service_id: &str) -> Result<(), NetworkError> {
        let control = self.control.as_mut().ok_or(NetworkError::NotReady)?;
        control
            .command(&format!("DEL_ONION {}", service_id))
            .await
            .map_err(interrupted)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        let halted = match self.control.take() {
            Some(mut control) => match control.command("SIGNAL HALT").await {
                Ok(_) | Err(ControlError::Closed) => true,
                Err(e) => {
                    warn!("Failed to halt tor: {}", e);
                    false
                }
            },
            None => false,
        };

        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        if halted {
            let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
            if let Ok(status) = timeout(grace, self.child.wait()).await {
                debug!("Tor exited: {}", status?);
                return Ok(());
            }
            warn!("Tor still running after {:?}, killing it", grace);
        }

        self.child.kill().await?;
        Ok(())
    }
}

/// Read a file tor may not have written yet
async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, NetworkError> {
    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A closed control connection means tor went away under us
fn interrupted(err: ControlError) -> NetworkError {
    match err {
        ControlError::Closed => NetworkError::Cancelled("tor closed the control connection".into()),
        other => other.into(),
    }
}

/// `PORT=127.0.0.1:9051`
fn parse_port_file(contents: &str) -> Option<SocketAddr> {
    contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("PORT="))
        .and_then(|addr| addr.parse().ok())
}

/// `status/bootstrap-phase=NOTICE BOOTSTRAP PROGRESS=85 TAG=ap_conn ...`
fn bootstrap_progress(reply: &Reply) -> Option<u8> {
    reply
        .value("status/bootstrap-phase")?
        .split_whitespace()
        .find_map(|field| field.strip_prefix("PROGRESS="))
        .and_then(|progress| progress.parse().ok())
}

/// `HS_DESC <action> <address> <auth> <hsdir> ...` as `(action, address)`
fn parse_hs_desc(event: &str) -> Option<(&str, &str)> {
    let mut fields = event.split_whitespace();
    if fields.next()? != "HS_DESC" {
        return None;
    }
    Some((fields.next()?, fields.next()?))
}
