//! Local control socket
//!
//! Newline-delimited JSON over a Unix socket. Used by the `status` command and
//! handy for driving the daemon from scripts.

use super::service::WifiService;
use super::state::{NetworkInfo, StatusSnapshot};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LinesCodec};

const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Delay after a failed accept, doubling up to a cap while failures repeat
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    const INITIAL: Duration = Duration::from_millis(50);
    const MAX: Duration = Duration::from_secs(2);

    fn new() -> Self {
        Self {
            next: Self::INITIAL,
        }
    }

    fn reset(&mut self) {
        self.next = Self::INITIAL;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        delay
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcRequest {
    GetStatus,
    Scan,
    Connect {
        ssid: String,
        #[serde(default)]
        password: String,
    },
    ChangeNetwork,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcResponse {
    Status(StatusSnapshot),
    Networks(Vec<NetworkInfo>),
    Ok,
    Error(String),
}

/// Bind the control socket, replacing a stale one left by a previous run
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind IPC socket {}", socket_path.display()))
}

pub async fn run_ipc_server(listener: UnixListener, service: Arc<WifiService>) -> Result<()> {
    let mut backoff = AcceptBackoff::new();
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                backoff.reset();
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, service).await {
                        tracing::warn!(error = %e, "IPC client error");
                    }
                });
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::error!(error = %e, retry_in = ?delay, "Failed to accept IPC connection");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn handle_client(stream: UnixStream, service: Arc<WifiService>) -> Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = framed.next().await {
        let line = line?;
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => dispatch(request, &service).await,
            Err(e) => IpcResponse::Error(format!("Invalid request: {}", e)),
        };
        framed.send(serde_json::to_string(&response)?).await?;
    }

    Ok(())
}

async fn dispatch(request: IpcRequest, service: &Arc<WifiService>) -> IpcResponse {
    tracing::debug!(request = ?request, "IPC request");
    match request {
        IpcRequest::GetStatus => IpcResponse::Status(service.status().await),
        IpcRequest::Scan => IpcResponse::Networks(service.scan_networks().await),
        IpcRequest::Connect { ssid, password } => match service.request_connect(&ssid, &password) {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::Error(e.to_string()),
        },
        IpcRequest::ChangeNetwork => {
            service.request_change_network();
            IpcResponse::Ok
        }
    }
}

/// Send one request and wait for the reply
pub async fn request(socket_path: &Path, request: &IpcRequest) -> Result<IpcResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    framed.send(serde_json::to_string(request)?).await?;
    let line = framed
        .next()
        .await
        .context("Daemon closed the connection without replying")??;
    Ok(serde_json::from_str(&line)?)
}

/// Get status from the daemon (client side)
pub async fn get_status(socket_path: &Path) -> Result<StatusSnapshot> {
    match request(socket_path, &IpcRequest::GetStatus).await? {
        IpcResponse::Status(status) => Ok(status),
        IpcResponse::Error(e) => anyhow::bail!("Daemon error: {}", e),
        other => anyhow::bail!("Unexpected response: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::super::service::testing::*;
    use super::*;
    use crate::controller::state::ServiceState;

    #[tokio::test]
    async fn serves_status_and_commands() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("wifi.sock");
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let listener = bind(&socket).unwrap();
        let server = tokio::spawn(run_ipc_server(listener, h.service.clone()));

        let status = get_status(&socket).await.unwrap();
        assert_eq!(status.current_state, ServiceState::HotspotMode);

        match request(&socket, &IpcRequest::Scan).await.unwrap() {
            IpcResponse::Networks(networks) => assert_eq!(networks.len(), 3),
            other => panic!("unexpected response {:?}", other),
        }

        let empty = IpcRequest::Connect {
            ssid: String::new(),
            password: String::new(),
        };
        assert!(matches!(
            request(&socket, &empty).await.unwrap(),
            IpcResponse::Error(_)
        ));

        server.abort();
    }

    #[tokio::test]
    async fn rejects_malformed_requests() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("wifi.sock");
        let h = harness();

        let listener = bind(&socket).unwrap();
        let server = tokio::spawn(run_ipc_server(listener, h.service.clone()));

        let stream = UnixStream::connect(&socket).await.unwrap();
        let mut framed = Framed::new(stream, LinesCodec::new());
        framed.send("not json".to_string()).await.unwrap();
        let reply: IpcResponse = serde_json::from_str(&framed.next().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, IpcResponse::Error(msg) if msg.starts_with("Invalid request")));

        server.abort();
    }

    #[test]
    fn accept_backoff_doubles_to_cap_and_resets() {
        let mut backoff = AcceptBackoff::new();
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], Duration::from_millis(50));
        assert_eq!(delays[1], Duration::from_millis(100));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(2));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("wifi.sock");
        std::fs::write(&socket, b"stale").unwrap();

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert!(bind(&socket).is_ok());
        });
    }
}
