//! Scan coordinator
//!
//! A full scan needs the radio, so in hotspot mode the access point is taken
//! down for the duration of the scan and brought back afterwards. The
//! lightweight path only reads results the radio already has.

use super::service::WifiService;
use super::state::{NetworkInfo, ServiceState};
use std::collections::HashSet;

/// Marks a full scan as running until dropped
struct ScanGuard<'a> {
    service: &'a WifiService,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.service.lock().scan_in_progress = false;
    }
}

impl WifiService {
    /// True while a connection attempt owns the radio. Both scan paths check
    /// this before touching the driver.
    pub(super) fn connect_owns_radio(&self) -> bool {
        let inner = self.lock();
        inner.state == ServiceState::Connecting || inner.connection_in_progress
    }

    pub fn scan_in_progress(&self) -> bool {
        self.lock().scan_in_progress
    }

    fn claim_scan(&self) -> Option<ScanGuard<'_>> {
        let mut inner = self.lock();
        if inner.scan_in_progress {
            return None;
        }
        inner.scan_in_progress = true;
        Some(ScanGuard { service: self })
    }

    /// Fresh scan. Never fails: errors come back as an empty list.
    pub async fn scan_networks(&self) -> Vec<NetworkInfo> {
        if self.connect_owns_radio() {
            tracing::info!("Connection in progress, skipping scan");
            return Vec::new();
        }

        let Some(_scan) = self.claim_scan() else {
            tracing::debug!("Scan already running, serving cached results");
            return self.lightweight_networks().await;
        };

        if self.current_state() == ServiceState::HotspotMode {
            self.scan_around_hotspot().await
        } else {
            match self.radio.available_networks().await {
                Ok(networks) => self.prepare(networks),
                Err(e) => {
                    tracing::warn!(error = %e, "Network scan failed");
                    Vec::new()
                }
            }
        }
    }

    async fn scan_around_hotspot(&self) -> Vec<NetworkInfo> {
        let hotspot_was_active = match self.radio.is_hotspot_active().await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(error = %e, "Could not check hotspot before scan");
                false
            }
        };

        let result = if hotspot_was_active {
            tracing::info!("Temporarily stopping hotspot to scan");
            match self.radio.stop_hotspot().await {
                Ok(()) => {
                    tokio::time::sleep(self.timings.settle_after_stop).await;
                    self.scan_unless_connecting().await
                }
                Err(e) => Err(e.to_string()),
            }
        } else {
            self.scan_unless_connecting().await
        };

        if hotspot_was_active {
            self.restore_hotspot_after_scan().await;
        }

        match result {
            Ok(networks) => self.prepare(networks),
            Err(reason) => {
                tracing::warn!(error = %reason, "Network scan failed");
                Vec::new()
            }
        }
    }

    async fn scan_unless_connecting(&self) -> Result<Vec<NetworkInfo>, String> {
        if self.connect_owns_radio() {
            return Ok(Vec::new());
        }
        self.radio
            .available_networks()
            .await
            .map_err(|e| e.to_string())
    }

    async fn restore_hotspot_after_scan(&self) {
        if self.current_state() != ServiceState::HotspotMode {
            tracing::info!(state = %self.current_state(), "State changed during scan, not restarting hotspot");
            return;
        }
        tokio::time::sleep(self.timings.settle_before_restart).await;

        tracing::info!("Restarting hotspot after scan");
        let restarted = self
            .start_hotspot_if(
                |inner| inner.state == ServiceState::HotspotMode && !inner.connection_in_progress,
                false,
            )
            .await;
        match restarted {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(state = %self.current_state(), "State changed during scan, not restarting hotspot");
            }
            Err(e) => tracing::error!(error = %e, "Failed to restart hotspot after scan"),
        }
    }

    /// Networks the radio already knows about. Leaves the hotspot alone.
    pub async fn lightweight_networks(&self) -> Vec<NetworkInfo> {
        if self.connect_owns_radio() {
            return Vec::new();
        }

        match self.radio.cached_networks().await {
            Ok(networks) => self.prepare(networks),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached networks");
                Vec::new()
            }
        }
    }

    /// Drop our own hotspot and duplicates, strongest signal first
    fn prepare(&self, networks: Vec<NetworkInfo>) -> Vec<NetworkInfo> {
        let mut networks: Vec<NetworkInfo> = networks
            .into_iter()
            .filter(|n| !n.ssid.is_empty() && n.ssid != self.config.hotspot_ssid)
            .collect();
        networks.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));

        let mut seen = HashSet::new();
        networks.retain(|n| seen.insert(n.ssid.clone()));
        networks
    }
}
