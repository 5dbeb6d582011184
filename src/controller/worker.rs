//! Connection worker
//!
//! One worker runs per accepted connect request. It owns the radio from the
//! moment it is spawned until its guard drops.

use super::radio::RadioResult;
use super::service::WifiService;
use super::state::ServiceState;
use futures::FutureExt;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Clears the connect target and the in-flight flag however the worker
/// exits, including when its task is aborted before it first runs.
pub(super) struct InFlightGuard {
    service: Arc<WifiService>,
}

impl InFlightGuard {
    pub(super) fn new(service: Arc<WifiService>) -> Self {
        Self { service }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut inner = self.service.lock();
        inner.target = None;
        inner.connection_in_progress = false;
        inner.worker = None;
        // Only reachable when the worker was aborted mid-attempt
        if inner.state == ServiceState::Connecting {
            inner.transition(ServiceState::Error);
        }
    }
}

enum Outcome {
    Connected { ssid: String },
    Failed(String),
}

impl WifiService {
    pub(super) async fn run_connection_worker(self: Arc<Self>, _guard: InFlightGuard) {
        let outcome = match AssertUnwindSafe(self.attempt_connection())
            .catch_unwind()
            .await
        {
            Ok(Ok(Some(ssid))) => Outcome::Connected { ssid },
            Ok(Ok(None)) => return,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::Failed("connection worker panicked".to_string()),
        };

        match outcome {
            Outcome::Connected { ssid } => self.finish_connected(ssid).await,
            Outcome::Failed(reason) => {
                tracing::warn!(error = %reason, "Connection attempt failed, restoring hotspot");
                tokio::time::sleep(self.timings.settle_before_restart).await;
                // A pending network change brings the hotspot back itself
                let _ = self
                    .enter_hotspot_mode_if(|inner| inner.state != ServiceState::Initializing)
                    .await;
            }
        }
    }

    /// Stop the hotspot and join the target network. Returns the SSID joined.
    async fn attempt_connection(&self) -> RadioResult<Option<String>> {
        let Some(ssid) = self.target_ssid() else {
            tracing::warn!("Connection worker started without a target");
            return Ok(None);
        };
        self.display.on_connecting(&ssid);

        if self.radio.is_hotspot_active().await? {
            tracing::info!("Stopping hotspot before connecting");
            self.radio.stop_hotspot().await?;
            tokio::time::sleep(self.timings.settle_after_stop).await;
        }

        // The target may have been replaced while the hotspot was settling
        let Some(target) = self.lock().target.clone() else {
            return Ok(None);
        };

        tracing::info!(ssid = %target.ssid, "Connecting to network");
        self.radio
            .connect_to_network(&target.ssid, &target.password)
            .await?;
        Ok(Some(target.ssid))
    }

    async fn finish_connected(&self, ssid: String) {
        let still_wanted = {
            let mut inner = self.lock();
            let wanted = inner.state == ServiceState::Connecting;
            if wanted {
                inner.transition(ServiceState::Connected);
            }
            wanted
        };
        if !still_wanted {
            tracing::warn!(ssid = %ssid, "Connected after the attempt was abandoned, returning to hotspot");
            let _ = self.enter_hotspot_mode().await;
            return;
        }

        let ip_address = match self.radio.connection_status().await {
            Ok(status) => status.ip_address,
            Err(e) => {
                tracing::warn!(error = %e, "Connected but status query failed");
                None
            }
        };

        tracing::info!(ssid = %ssid, ip = ?ip_address, "Connected to network");
        if let Some(ip) = &ip_address {
            tracing::info!(
                url = %format!("http://{}:{}", ip, self.config.port),
                "Device now reachable on the new network"
            );
            match ip.parse::<Ipv4Addr>() {
                Ok(addr) => self.advertiser.advertise(addr, self.config.port),
                Err(e) => tracing::warn!(ip = %ip, error = %e, "Not advertising non-IPv4 address"),
            }
        }
        self.display
            .on_connected(&ssid, ip_address.as_deref().unwrap_or("unknown"));
    }
}
