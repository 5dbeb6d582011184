//! Shared state types for the provisioning controller

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Placeholder address reported while the hotspot is up but no live status is
/// available. Never a real assigned address, so it never triggers a redirect.
pub const LOCAL_SETUP_ADDRESS: &str = "localhost";

/// Service-level state owned by the controller
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Initializing,
    HotspotMode,
    Connecting,
    Connected,
    Error,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Initializing => "initializing",
            ServiceState::HotspotMode => "hotspot_mode",
            ServiceState::Connecting => "connecting",
            ServiceState::Connected => "connected",
            ServiceState::Error => "error",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The network a connection attempt is targeting
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub ssid: String,
    pub password: String,
    pub started_at: Instant,
}

impl ConnectionTarget {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Whether a network requires credentials
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    Open,
    Encrypted,
}

impl Security {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Security::Encrypted)
    }
}

/// Information about a discovered WiFi network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkInfo {
    pub ssid: String,
    pub signal_strength: u8, // 0-100
    pub security: Security,
    pub frequency: String,
}

/// Connection status as reported by the radio
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WifiStatus {
    pub connected: bool,
    pub ssid: Option<String>,
    pub ip_address: Option<String>,
    pub interface: Option<String>,
}

impl WifiStatus {
    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Point-in-time view of the service handed to the front end.
///
/// `ip_address` carries [`LOCAL_SETUP_ADDRESS`] when the snapshot was
/// synthesized in hotspot mode without a live radio query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub connecting: bool,
    pub ssid: Option<String>,
    pub ip_address: Option<String>,
    pub interface: Option<String>,
    pub current_state: ServiceState,
    pub target_ssid: Option<String>,
    pub elapsed_seconds: u64,
    pub redirect_url: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// Empty snapshot for `state`, stamped with the current time
    pub fn new(state: ServiceState) -> Self {
        Self {
            connected: false,
            connecting: false,
            ssid: None,
            ip_address: None,
            interface: None,
            current_state: state,
            target_ssid: None,
            elapsed_seconds: 0,
            redirect_url: None,
            timestamp: unix_timestamp(),
            message: None,
            error: None,
        }
    }
}

pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_state_serializes_snake_case() {
        let json = serde_json::to_string(&ServiceState::HotspotMode).unwrap();
        assert_eq!(json, "\"hotspot_mode\"");
        assert_eq!(ServiceState::HotspotMode.to_string(), "hotspot_mode");
    }

    #[test]
    fn snapshot_omits_empty_message_fields() {
        let snapshot = StatusSnapshot::new(ServiceState::Connected);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("message").is_none());
        assert!(value.get("error").is_none());
        assert_eq!(value["current_state"], "connected");
    }
}
