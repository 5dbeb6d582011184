//! In-memory radio for development without hardware
//!
//! `--simulate` runs the daemon against this driver. It keeps a log of every
//! radio call and can be told to fail or stall specific operations.

use super::radio::{RadioDriver, RadioError, RadioResult};
use super::state::{NetworkInfo, Security, WifiStatus};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SIMULATED_INTERFACE: &str = "wlan0";
const SIMULATED_HOTSPOT_ADDRESS: &str = "192.168.4.1";
const SIMULATED_CLIENT_ADDRESS: &str = "192.168.1.50";

/// A radio call as seen by the simulated driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    StartHotspot(String),
    StopHotspot,
    IsHotspotActive,
    Connect(String),
    Status,
    Scan,
    CachedScan,
}

impl RadioCall {
    /// Whether the call changes what the radio is doing
    #[cfg(test)]
    pub fn is_radio_owning(&self) -> bool {
        matches!(
            self,
            RadioCall::StartHotspot(_) | RadioCall::StopHotspot | RadioCall::Connect(_) | RadioCall::Scan
        )
    }
}

#[derive(Debug)]
struct Radio {
    hotspot_ssid: Option<String>,
    client_ssid: Option<String>,
    networks: Vec<NetworkInfo>,
    calls: Vec<RadioCall>,
    fail_connect: bool,
    fail_hotspot_start: bool,
    fail_hotspot_stop: bool,
    fail_status: bool,
    panic_next_status: bool,
    fail_scan: bool,
    connect_delay: Duration,
    hotspot_start_delay: Duration,
    hotspot_check_delay: Duration,
}

impl Radio {
    fn record(&mut self, call: RadioCall) {
        tracing::debug!(call = ?call, seq = self.calls.len(), "Simulated radio call");
        self.calls.push(call);
    }
}

#[derive(Debug)]
pub struct SimulatedRadio {
    inner: Mutex<Radio>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Radio {
                hotspot_ssid: None,
                client_ssid: None,
                networks: Vec::new(),
                calls: Vec::new(),
                fail_connect: false,
                fail_hotspot_start: false,
                fail_hotspot_stop: false,
                fail_status: false,
                panic_next_status: false,
                fail_scan: false,
                connect_delay: Duration::ZERO,
                hotspot_start_delay: Duration::ZERO,
                hotspot_check_delay: Duration::ZERO,
            }),
        }
    }

    /// A radio that sees a handful of neighbouring networks
    pub fn with_sample_networks() -> Self {
        let radio = Self::new();
        radio.set_networks(vec![
            sample("HomeNetwork", 82, Security::Encrypted, "2.4 GHz"),
            sample("CoffeeShop", 64, Security::Open, "2.4 GHz"),
            sample("Office-5G", 47, Security::Encrypted, "5 GHz"),
        ]);
        radio
    }

    fn lock(&self) -> MutexGuard<'_, Radio> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_networks(&self, networks: Vec<NetworkInfo>) {
        self.lock().networks = networks;
    }
}

/// Fault injection and inspection for tests
#[cfg(test)]
impl SimulatedRadio {
    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn set_fail_hotspot_start(&self, fail: bool) {
        self.lock().fail_hotspot_start = fail;
    }

    pub fn set_fail_hotspot_stop(&self, fail: bool) {
        self.lock().fail_hotspot_stop = fail;
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.lock().fail_status = fail;
    }

    /// The next status query panics inside the driver
    pub fn panic_next_status(&self) {
        self.lock().panic_next_status = true;
    }

    pub fn set_fail_scan(&self, fail: bool) {
        self.lock().fail_scan = fail;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    pub fn set_hotspot_start_delay(&self, delay: Duration) {
        self.lock().hotspot_start_delay = delay;
    }

    pub fn set_hotspot_check_delay(&self, delay: Duration) {
        self.lock().hotspot_check_delay = delay;
    }

    /// Simulate the access point dropping on its own
    pub fn drop_hotspot(&self) {
        self.lock().hotspot_ssid = None;
    }

    /// Simulate losing the upstream network
    pub fn drop_client(&self) {
        self.lock().client_ssid = None;
    }

    /// Put the radio in client mode without going through a connect call
    pub fn force_client(&self, ssid: &str) {
        let mut radio = self.lock();
        radio.hotspot_ssid = None;
        radio.client_ssid = Some(ssid.to_string());
    }

    pub fn hotspot_active(&self) -> bool {
        self.lock().hotspot_ssid.is_some()
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&RadioCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

fn sample(ssid: &str, signal: u8, security: Security, frequency: &str) -> NetworkInfo {
    NetworkInfo {
        ssid: ssid.to_string(),
        signal_strength: signal,
        security,
        frequency: frequency.to_string(),
    }
}

#[async_trait]
impl RadioDriver for SimulatedRadio {
    async fn start_hotspot(&self, ssid: &str, _password: &str) -> RadioResult<()> {
        let delay = {
            let mut radio = self.lock();
            radio.record(RadioCall::StartHotspot(ssid.to_string()));
            radio.hotspot_start_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut radio = self.lock();
        if radio.fail_hotspot_start {
            return Err(RadioError::HotspotStart("simulated failure".to_string()));
        }
        radio.client_ssid = None;
        radio.hotspot_ssid = Some(ssid.to_string());
        tracing::debug!(ssid = %ssid, "Simulated hotspot started");
        Ok(())
    }

    async fn stop_hotspot(&self) -> RadioResult<()> {
        let mut radio = self.lock();
        radio.record(RadioCall::StopHotspot);
        if radio.fail_hotspot_stop {
            return Err(RadioError::HotspotStop("simulated failure".to_string()));
        }
        radio.hotspot_ssid = None;
        Ok(())
    }

    async fn is_hotspot_active(&self) -> RadioResult<bool> {
        let delay = {
            let mut radio = self.lock();
            radio.record(RadioCall::IsHotspotActive);
            radio.hotspot_check_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lock().hotspot_ssid.is_some())
    }

    async fn connect_to_network(&self, ssid: &str, _password: &str) -> RadioResult<()> {
        let delay = {
            let mut radio = self.lock();
            radio.record(RadioCall::Connect(ssid.to_string()));
            radio.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut radio = self.lock();
        if radio.fail_connect {
            return Err(RadioError::ConnectFailed {
                ssid: ssid.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        radio.hotspot_ssid = None;
        radio.client_ssid = Some(ssid.to_string());
        Ok(())
    }

    async fn connection_status(&self) -> RadioResult<WifiStatus> {
        let mut radio = self.lock();
        radio.record(RadioCall::Status);
        if radio.panic_next_status {
            radio.panic_next_status = false;
            panic!("simulated driver fault");
        }
        if radio.fail_status {
            return Err(RadioError::Status("simulated failure".to_string()));
        }

        // An access point counts as an active connection, the same way
        // NetworkManager reports it.
        let status = if let Some(ssid) = &radio.hotspot_ssid {
            WifiStatus {
                connected: true,
                ssid: Some(ssid.clone()),
                ip_address: Some(SIMULATED_HOTSPOT_ADDRESS.to_string()),
                interface: Some(SIMULATED_INTERFACE.to_string()),
            }
        } else if let Some(ssid) = &radio.client_ssid {
            WifiStatus {
                connected: true,
                ssid: Some(ssid.clone()),
                ip_address: Some(SIMULATED_CLIENT_ADDRESS.to_string()),
                interface: Some(SIMULATED_INTERFACE.to_string()),
            }
        } else {
            WifiStatus::disconnected()
        };
        Ok(status)
    }

    async fn available_networks(&self) -> RadioResult<Vec<NetworkInfo>> {
        let mut radio = self.lock();
        radio.record(RadioCall::Scan);
        if radio.fail_scan {
            return Err(RadioError::ScanFailed("simulated failure".to_string()));
        }
        Ok(radio.networks.clone())
    }

    async fn cached_networks(&self) -> RadioResult<Vec<NetworkInfo>> {
        let mut radio = self.lock();
        radio.record(RadioCall::CachedScan);
        if radio.fail_scan {
            return Err(RadioError::ScanFailed("simulated failure".to_string()));
        }
        Ok(radio.networks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hotspot_reports_as_connection() {
        let radio = SimulatedRadio::new();
        radio.start_hotspot("DistillerSetup", "setup123").await.unwrap();

        let status = radio.connection_status().await.unwrap();
        assert!(status.connected);
        assert_eq!(status.ssid.as_deref(), Some("DistillerSetup"));
        assert_eq!(status.ip_address.as_deref(), Some("192.168.4.1"));
    }

    #[tokio::test]
    async fn connect_replaces_hotspot() {
        let radio = SimulatedRadio::new();
        radio.start_hotspot("DistillerSetup", "setup123").await.unwrap();
        radio.connect_to_network("HomeNetwork", "secret").await.unwrap();

        assert!(!radio.hotspot_active());
        let status = radio.connection_status().await.unwrap();
        assert_eq!(status.ssid.as_deref(), Some("HomeNetwork"));
        assert_eq!(status.ip_address.as_deref(), Some("192.168.1.50"));
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let radio = SimulatedRadio::new();
        radio.set_fail_connect(true);
        radio.set_fail_hotspot_start(true);

        assert!(matches!(
            radio.connect_to_network("HomeNetwork", "").await,
            Err(RadioError::ConnectFailed { .. })
        ));
        assert!(radio.start_hotspot("DistillerSetup", "setup123").await.is_err());
        assert!(!radio.hotspot_active());
        assert_eq!(radio.count(RadioCall::is_radio_owning), 2);
    }
}
