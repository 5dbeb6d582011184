//! Provisioning controller
//!
//! [`WifiService`] owns the service state and mediates every radio operation.
//! The state lock is a plain mutex that is never held across an await, so
//! status queries stay responsive while the radio is busy.

use super::mdns::Advertiser;
use super::radio::{RadioDriver, RadioError};
use super::state::{
    unix_timestamp, ConnectionTarget, ServiceState, StatusSnapshot, WifiStatus,
    LOCAL_SETUP_ADDRESS,
};
use super::worker::InFlightGuard;
use crate::display::DisplayNotifier;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("SSID is required")]
    EmptySsid,

    #[error("failed to start hotspot: {0}")]
    HotspotStart(#[from] RadioError),
}

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub hotspot_ssid: String,
    pub hotspot_password: String,
    pub device_name: String,
    pub port: u16,
    pub hotspot_address: String,
}

impl ServiceConfig {
    /// URL of the setup portal as seen from a hotspot client
    pub fn setup_url(&self) -> String {
        format!("http://{}:{}", self.hotspot_address, self.port)
    }

    /// Addresses that belong to the setup network and never warrant a redirect
    pub fn is_hotspot_address(&self, ip: &str) -> bool {
        ip == self.hotspot_address || ip == LOCAL_SETUP_ADDRESS || ip == "127.0.0.1"
    }
}

/// Delays used by the controller
#[derive(Debug, Clone)]
pub struct Timings {
    /// Radio settle time after stopping the hotspot
    pub settle_after_stop: Duration,
    /// Radio settle time before bringing the hotspot back
    pub settle_before_restart: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_error_backoff: Duration,
    /// How long a connect attempt may stay in `Connecting`
    pub connect_timeout: Duration,
    pub change_network_grace: Duration,
    /// Wait before re-checking a hotspot the watchdog found down
    pub hotspot_recheck_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_after_stop: Duration::from_secs(3),
            settle_before_restart: Duration::from_secs(2),
            watchdog_interval: Duration::from_secs(10),
            watchdog_error_backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(120),
            change_network_grace: Duration::from_secs(15),
            hotspot_recheck_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct ControllerState {
    pub(super) state: ServiceState,
    pub(super) target: Option<ConnectionTarget>,
    /// True exactly while a connection worker runs
    pub(super) connection_in_progress: bool,
    pub(super) scan_in_progress: bool,
    pub(super) transition_pending: bool,
    pub(super) worker: Option<JoinHandle<()>>,
    pub(super) transition: Option<JoinHandle<()>>,
    /// Bumped on every state change. A caller that awaited the radio compares
    /// it to learn whether someone else moved the state meanwhile.
    pub(super) epoch: u64,
}

impl ControllerState {
    /// The only place the service state is assigned
    pub(super) fn transition(&mut self, next: ServiceState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "State transition");
            self.state = next;
            self.epoch = self.epoch.wrapping_add(1);
        }
    }
}

/// Clears the pending network change however its task exits. A change that
/// never reached a hotspot leaves `Error` behind for the watchdog.
struct TransitionGuard {
    service: Arc<WifiService>,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        let mut inner = self.service.lock();
        inner.transition_pending = false;
        inner.transition = None;
        if inner.state == ServiceState::Initializing {
            inner.transition(ServiceState::Error);
        }
    }
}

pub struct WifiService {
    pub(super) radio: Arc<dyn RadioDriver>,
    pub(super) display: Arc<dyn DisplayNotifier>,
    pub(super) advertiser: Arc<dyn Advertiser>,
    pub(super) config: ServiceConfig,
    pub(super) timings: Timings,
    inner: Mutex<ControllerState>,
}

impl WifiService {
    pub fn new(
        radio: Arc<dyn RadioDriver>,
        display: Arc<dyn DisplayNotifier>,
        advertiser: Arc<dyn Advertiser>,
        config: ServiceConfig,
        timings: Timings,
    ) -> Arc<Self> {
        Arc::new(Self {
            radio,
            display,
            advertiser,
            config,
            timings,
            inner: Mutex::new(ControllerState::default()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_state(&self) -> ServiceState {
        self.lock().state
    }

    pub(super) fn set_state(&self, next: ServiceState) {
        self.lock().transition(next);
    }

    #[cfg(test)]
    pub fn connection_in_progress(&self) -> bool {
        self.lock().connection_in_progress
    }

    /// SSID of the outstanding connect attempt, if any
    pub fn target_ssid(&self) -> Option<String> {
        self.lock().target.as_ref().map(|t| t.ssid.clone())
    }

    /// Query the radio once and settle the startup state
    pub async fn determine_initial_state(&self) -> ServiceState {
        let next = match self.radio.connection_status().await {
            Ok(status) => match status.ssid.as_deref() {
                Some(ssid) if status.connected && ssid.starts_with(&self.config.hotspot_ssid) => {
                    tracing::info!(ssid = %ssid, "Setup hotspot already running");
                    ServiceState::HotspotMode
                }
                Some(ssid) if status.connected => {
                    tracing::info!(ssid = %ssid, "Already connected to a network");
                    ServiceState::Connected
                }
                _ => ServiceState::HotspotMode,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Could not read connection status at startup");
                ServiceState::HotspotMode
            }
        };
        self.set_state(next);
        next
    }

    /// Switch to hotspot mode and start the access point.
    ///
    /// On failure the state becomes `Error`; the watchdog retries on its next
    /// tick.
    pub async fn enter_hotspot_mode(&self) -> Result<(), ServiceError> {
        self.start_hotspot_if(|_| true, true).await.map(|_| ())
    }

    /// Like [`enter_hotspot_mode`](Self::enter_hotspot_mode), but only when
    /// `allowed` holds at the moment of the transition. Returns `Ok(false)`
    /// without touching the radio otherwise.
    pub(super) async fn enter_hotspot_mode_if(
        &self,
        allowed: impl FnOnce(&ControllerState) -> bool,
    ) -> Result<bool, ServiceError> {
        self.start_hotspot_if(allowed, true).await
    }

    /// Check and transition happen under one lock. After the radio call the
    /// outcome is only recorded if nobody changed the state in between, so a
    /// connect accepted meanwhile keeps its own result.
    pub(super) async fn start_hotspot_if(
        &self,
        allowed: impl FnOnce(&ControllerState) -> bool,
        announce: bool,
    ) -> Result<bool, ServiceError> {
        let epoch = {
            let mut inner = self.lock();
            if !allowed(&inner) {
                return Ok(false);
            }
            inner.transition(ServiceState::HotspotMode);
            inner.epoch
        };
        self.advertiser.withdraw();

        let ssid = &self.config.hotspot_ssid;
        let result = self
            .radio
            .start_hotspot(ssid, &self.config.hotspot_password)
            .await;

        let still_ours = {
            let mut inner = self.lock();
            let still_ours = inner.epoch == epoch;
            if still_ours && result.is_err() {
                inner.transition(ServiceState::Error);
            }
            still_ours
        };

        match result {
            Ok(()) if still_ours => {
                tracing::info!(ssid = %ssid, url = %self.config.setup_url(), "Hotspot mode active");
                if announce {
                    self.display.on_enter_setup();
                }
                Ok(true)
            }
            Ok(()) => {
                tracing::info!(state = %self.current_state(), "State changed while starting hotspot");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(ssid = %ssid, error = %e, "Failed to start hotspot");
                Err(ServiceError::HotspotStart(e))
            }
        }
    }

    /// Record a connect target and start the connection worker.
    ///
    /// Returns immediately. While a worker is already running only the target
    /// is replaced; the running worker picks it up when it connects.
    pub fn request_connect(self: &Arc<Self>, ssid: &str, password: &str) -> Result<(), ServiceError> {
        if ssid.trim().is_empty() {
            return Err(ServiceError::EmptySsid);
        }

        let mut inner = self.lock();
        inner.target = Some(ConnectionTarget::new(ssid, password));

        if inner.connection_in_progress {
            tracing::info!(ssid = %ssid, "Connection already in progress, updated target");
            return Ok(());
        }

        inner.connection_in_progress = true;
        inner.transition(ServiceState::Connecting);

        let service = Arc::clone(self);
        let guard = InFlightGuard::new(Arc::clone(self));
        inner.worker = Some(tokio::spawn(async move {
            service.run_connection_worker(guard).await;
        }));
        tracing::info!(ssid = %ssid, "Connection worker started");
        Ok(())
    }

    /// Leave the current network and return to setup mode after the grace
    /// delay, giving the browser time to render the transition page.
    pub fn request_change_network(self: &Arc<Self>) {
        let mut inner = self.lock();
        inner.transition(ServiceState::Initializing);

        if inner.transition_pending {
            tracing::debug!("Network change already scheduled");
            return;
        }
        inner.transition_pending = true;

        let service = Arc::clone(self);
        let guard = TransitionGuard {
            service: Arc::clone(self),
        };
        inner.transition = Some(tokio::spawn(async move {
            service.run_network_change(guard).await;
        }));
    }

    async fn run_network_change(self: Arc<Self>, _guard: TransitionGuard) {
        tokio::time::sleep(self.timings.change_network_grace).await;

        if self.current_state() != ServiceState::Initializing {
            tracing::info!(state = %self.current_state(), "State changed during grace delay, skipping network change");
            return;
        }

        if AssertUnwindSafe(self.disconnect_and_enter_hotspot_mode())
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!("Network change panicked, watchdog will recover");
        }
    }

    async fn disconnect_and_enter_hotspot_mode(&self) {
        match self.radio.connection_status().await {
            Ok(status) if status.connected => {
                tracing::info!(ssid = ?status.ssid, "Leaving current network");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Status unavailable before network change"),
        }

        match self
            .enter_hotspot_mode_if(|inner| inner.state == ServiceState::Initializing)
            .await
        {
            Ok(true) => return,
            Ok(false) => {
                tracing::info!(state = %self.current_state(), "State changed before network change, leaving radio alone");
                return;
            }
            Err(_) => {}
        }

        tracing::warn!("Retrying hotspot start after network change");
        tokio::time::sleep(self.timings.settle_before_restart).await;
        if let Err(e) = self
            .enter_hotspot_mode_if(|inner| inner.state == ServiceState::Error)
            .await
        {
            tracing::error!(error = %e, "Hotspot unavailable after network change, watchdog will retry");
        }
    }

    /// Current status for the front end. Never fails.
    pub async fn status(&self) -> StatusSnapshot {
        let (state, target) = {
            let inner = self.lock();
            (inner.state, inner.target.clone())
        };

        match self.radio.connection_status().await {
            Ok(wifi) => self.live_snapshot(state, target.as_ref(), wifi),
            Err(e) => {
                tracing::debug!(error = %e, state = %state, "Status query failed, using fallback");
                self.fallback_snapshot(state, target.as_ref())
            }
        }
    }

    fn base_snapshot(&self, state: ServiceState, target: Option<&ConnectionTarget>) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::new(state);
        if let Some(target) = target {
            snapshot.target_ssid = Some(target.ssid.clone());
            snapshot.elapsed_seconds = target.elapsed_secs();
            snapshot.connecting = state == ServiceState::Connecting
                && target.started_at.elapsed() < self.timings.connect_timeout;
        }
        snapshot
    }

    fn live_snapshot(
        &self,
        state: ServiceState,
        target: Option<&ConnectionTarget>,
        wifi: WifiStatus,
    ) -> StatusSnapshot {
        let mut snapshot = self.base_snapshot(state, target);
        snapshot.connected = wifi.connected && state == ServiceState::Connected;
        snapshot.redirect_url = match wifi.ip_address.as_deref() {
            Some(ip) if snapshot.connected && !self.config.is_hotspot_address(ip) => {
                Some(format!("http://{}:{}", ip, self.config.port))
            }
            _ => None,
        };
        snapshot.ssid = wifi.ssid;
        snapshot.ip_address = wifi.ip_address;
        snapshot.interface = wifi.interface;
        snapshot
    }

    /// Snapshot synthesized from the service state alone
    pub(super) fn fallback_snapshot(
        &self,
        state: ServiceState,
        target: Option<&ConnectionTarget>,
    ) -> StatusSnapshot {
        let mut snapshot = self.base_snapshot(state, target);
        match state {
            ServiceState::HotspotMode => {
                snapshot.ssid = Some(self.config.hotspot_ssid.clone());
                snapshot.ip_address = Some(LOCAL_SETUP_ADDRESS.to_string());
                snapshot.message = Some("Hotspot mode active".to_string());
            }
            ServiceState::Connecting => {
                snapshot.connecting = true;
                snapshot.message = Some(match &snapshot.target_ssid {
                    Some(ssid) => format!("Connecting to {}...", ssid),
                    None => "Connecting...".to_string(),
                });
            }
            ServiceState::Initializing => {
                snapshot.message = Some("Changing network configuration...".to_string());
            }
            ServiceState::Connected | ServiceState::Error => {
                snapshot.error = Some("Status check failed - service transitioning".to_string());
            }
        }
        snapshot.timestamp = unix_timestamp();
        snapshot
    }

    /// Abort background work and take the hotspot down
    pub async fn shutdown(&self) {
        let (worker, transition) = {
            let mut inner = self.lock();
            (inner.worker.take(), inner.transition.take())
        };
        for handle in [worker, transition].into_iter().flatten() {
            handle.abort();
        }
        self.advertiser.withdraw();

        match self.radio.is_hotspot_active().await {
            Ok(true) => {
                if let Err(e) = self.radio.stop_hotspot().await {
                    tracing::warn!(error = %e, "Failed to stop hotspot during shutdown");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Could not check hotspot during shutdown"),
        }
        tracing::info!("WiFi service stopped");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::controller::simulated::RadioCall;
    use crate::display::testing::DisplayEvent;

    #[tokio::test]
    async fn initial_state_follows_radio() {
        let h = harness();
        assert_eq!(h.service.determine_initial_state().await, ServiceState::HotspotMode);

        h.radio.force_client("HomeNetwork");
        assert_eq!(h.service.determine_initial_state().await, ServiceState::Connected);

        h.radio.force_client("DistillerSetup-1234");
        assert_eq!(h.service.determine_initial_state().await, ServiceState::HotspotMode);

        h.radio.set_fail_status(true);
        assert_eq!(h.service.determine_initial_state().await, ServiceState::HotspotMode);
    }

    #[tokio::test]
    async fn enter_hotspot_mode_failure_sets_error() {
        let h = harness();
        h.radio.set_fail_hotspot_start(true);

        assert!(h.service.enter_hotspot_mode().await.is_err());
        assert_eq!(h.service.current_state(), ServiceState::Error);
        assert!(h.display.events().is_empty());

        h.radio.set_fail_hotspot_start(false);
        h.service.enter_hotspot_mode().await.unwrap();
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert_eq!(h.display.events(), vec![DisplayEvent::Setup]);
    }

    #[tokio::test]
    async fn enter_hotspot_mode_is_idempotent() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.service.enter_hotspot_mode().await.unwrap();

        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.radio.hotspot_active());
    }

    #[tokio::test]
    async fn empty_ssid_is_rejected_without_state_change() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.clear_calls();

        assert!(matches!(
            h.service.request_connect("", "secret"),
            Err(ServiceError::EmptySsid)
        ));
        assert!(matches!(
            h.service.request_connect("   ", ""),
            Err(ServiceError::EmptySsid)
        ));
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.service.target_ssid().is_none());
        assert!(h.radio.calls().is_empty());
    }

    // Scenario A
    #[tokio::test]
    async fn successful_connect_reaches_connected() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        h.service.request_connect("HomeNetwork", "secret").unwrap();
        assert_eq!(h.service.current_state(), ServiceState::Connecting);

        assert!(wait_until(|| !h.service.connection_in_progress()).await);
        assert_eq!(h.service.current_state(), ServiceState::Connected);
        assert!(h.service.target_ssid().is_none());
        assert_eq!(
            h.display.count(|e| matches!(e, DisplayEvent::Connected(..))),
            1
        );
        assert!(h
            .display
            .events()
            .contains(&DisplayEvent::Connected("HomeNetwork".into(), "192.168.1.50".into())));
    }

    // Scenario B
    #[tokio::test]
    async fn failed_connect_restores_hotspot() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.set_fail_connect(true);

        h.service.request_connect("HomeNetwork", "wrong").unwrap();
        assert!(wait_until(|| !h.service.connection_in_progress()).await);

        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.radio.hotspot_active());
        assert!(h.service.target_ssid().is_none());
        assert_eq!(
            h.display.count(|e| matches!(e, DisplayEvent::Connected(..))),
            0
        );
    }

    #[tokio::test]
    async fn second_request_updates_target_without_second_worker() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.set_connect_delay(Duration::from_millis(50));

        h.service.request_connect("First", "").unwrap();
        h.service.request_connect("Second", "pw").unwrap();
        assert_eq!(h.service.target_ssid().as_deref(), Some("Second"));

        assert!(wait_until(|| !h.service.connection_in_progress()).await);
        let connects: Vec<_> = h
            .radio
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RadioCall::Connect(_)))
            .collect();
        assert_eq!(connects, vec![RadioCall::Connect("Second".into())]);
        assert_eq!(h.service.current_state(), ServiceState::Connected);
    }

    // Scenario D
    #[tokio::test]
    async fn change_network_returns_to_hotspot_after_grace() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        assert_eq!(h.service.determine_initial_state().await, ServiceState::Connected);

        h.service.request_change_network();
        h.service.request_change_network();
        assert_eq!(h.service.current_state(), ServiceState::Initializing);
        assert!(!h.radio.hotspot_active());

        assert!(wait_until(|| h.service.current_state() == ServiceState::HotspotMode).await);
        assert!(wait_until(|| !h.service.lock().transition_pending).await);
        assert_eq!(
            h.radio.count(|c| matches!(c, RadioCall::StartHotspot(_))),
            1
        );
    }

    #[tokio::test]
    async fn change_network_ends_in_error_when_hotspot_unavailable() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;
        h.radio.set_fail_hotspot_start(true);

        h.service.request_change_network();
        assert!(wait_until(|| !h.service.lock().transition_pending).await);
        assert_eq!(h.service.current_state(), ServiceState::Error);
        assert_eq!(
            h.radio.count(|c| matches!(c, RadioCall::StartHotspot(_))),
            2
        );
    }

    #[tokio::test]
    async fn driver_panic_during_change_network_does_not_stick() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;
        h.radio.panic_next_status();

        h.service.request_change_network();
        assert!(wait_until(|| !h.service.lock().transition_pending).await);
        assert_eq!(h.service.current_state(), ServiceState::Error);

        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.radio.hotspot_active());

        // Later change requests are still scheduled
        h.service.request_change_network();
        assert!(h.service.lock().transition_pending);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn change_network_yields_to_connect_made_during_grace() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;
        h.radio.set_connect_delay(Duration::from_secs(5));

        h.service.request_change_network();
        h.service.request_connect("Office-5G", "secret").unwrap();
        assert!(wait_until(|| !h.service.lock().transition_pending).await);

        assert_eq!(h.service.current_state(), ServiceState::Connecting);
        assert_eq!(
            h.radio.count(|c| matches!(c, RadioCall::StartHotspot(_))),
            0
        );
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn status_reports_redirect_when_connected() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;

        let status = h.service.status().await;
        assert!(status.connected);
        assert_eq!(status.ssid.as_deref(), Some("HomeNetwork"));
        assert_eq!(status.redirect_url.as_deref(), Some("http://192.168.1.50:8080"));
    }

    #[tokio::test]
    async fn hotspot_connection_is_not_reported_as_connected() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let status = h.service.status().await;
        assert!(!status.connected);
        assert!(status.redirect_url.is_none());
        assert_eq!(status.current_state, ServiceState::HotspotMode);
    }

    #[tokio::test]
    async fn status_is_total_when_radio_fails() {
        let h = harness();
        h.radio.set_fail_status(true);

        for state in [
            ServiceState::Initializing,
            ServiceState::HotspotMode,
            ServiceState::Connecting,
            ServiceState::Connected,
            ServiceState::Error,
        ] {
            h.service.set_state(state);
            let status = h.service.status().await;
            assert_eq!(status.current_state, state);
            assert!(!status.connected);
            assert!(status.redirect_url.is_none());
            assert!(status.message.is_some() || status.error.is_some());
        }
    }

    #[tokio::test]
    async fn fallback_uses_local_setup_address_in_hotspot_mode() {
        let h = harness();
        let snapshot = h.service.fallback_snapshot(ServiceState::HotspotMode, None);
        assert_eq!(snapshot.ip_address.as_deref(), Some(LOCAL_SETUP_ADDRESS));
        assert_eq!(snapshot.message.as_deref(), Some("Hotspot mode active"));

        let target = ConnectionTarget::new("HomeNetwork", "");
        let snapshot = h
            .service
            .fallback_snapshot(ServiceState::Connecting, Some(&target));
        assert!(snapshot.connecting);
        assert_eq!(snapshot.target_ssid.as_deref(), Some("HomeNetwork"));

        let snapshot = h.service.fallback_snapshot(ServiceState::Error, None);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Status check failed - service transitioning")
        );
    }

    #[tokio::test]
    async fn shutdown_stops_hotspot() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.service.shutdown().await;
        assert!(!h.radio.hotspot_active());
    }
}
