//! Radio driver abstraction
//!
//! Everything that touches the wireless hardware goes through [`RadioDriver`].
//! Implementations make no promises about concurrent use: the controller is
//! responsible for never running two radio-owning operations at once.

use super::state::{NetworkInfo, WifiStatus};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("hotspot failed to start: {0}")]
    HotspotStart(String),

    #[error("hotspot failed to stop: {0}")]
    HotspotStop(String),

    #[error("connection to '{ssid}' failed: {reason}")]
    ConnectFailed { ssid: String, reason: String },

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("status query failed: {0}")]
    Status(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type RadioResult<T> = std::result::Result<T, RadioError>;

/// Operations the single radio supports
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Bring up the access point with the given credentials. Restarts it if
    /// it is already running.
    async fn start_hotspot(&self, ssid: &str, password: &str) -> RadioResult<()>;

    /// Tear the access point down. Succeeds if it was not running.
    async fn stop_hotspot(&self) -> RadioResult<()>;

    async fn is_hotspot_active(&self) -> RadioResult<bool>;

    /// Join `ssid` as a station. An empty password means an open network.
    async fn connect_to_network(&self, ssid: &str, password: &str) -> RadioResult<()>;

    async fn connection_status(&self) -> RadioResult<WifiStatus>;

    /// Trigger a fresh scan and return what the radio sees
    async fn available_networks(&self) -> RadioResult<Vec<NetworkInfo>>;

    /// Networks already known to the radio from earlier scans. Must not
    /// disturb the hotspot.
    async fn cached_networks(&self) -> RadioResult<Vec<NetworkInfo>>;
}
