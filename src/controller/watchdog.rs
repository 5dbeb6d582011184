//! Watchdog loop
//!
//! Periodically compares the service state with what the radio is doing and
//! steers the radio back when they diverge.

use super::service::WifiService;
use super::state::ServiceState;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl WifiService {
    /// Run until `cancel` fires
    pub async fn run_watchdog(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(interval = ?self.timings.watchdog_interval, "Watchdog started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.timings.watchdog_interval) => {}
            }

            if AssertUnwindSafe(self.watchdog_tick())
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::error!("Watchdog tick panicked, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.timings.watchdog_error_backoff) => {}
                }
            }
        }

        tracing::info!("Watchdog stopped");
    }

    /// One watchdog pass
    pub async fn watchdog_tick(&self) {
        let state = self.current_state();
        tracing::trace!(state = %state, "Watchdog tick");

        match state {
            ServiceState::HotspotMode => self.check_hotspot().await,
            ServiceState::Connected => self.check_connection().await,
            ServiceState::Connecting => self.check_connect_timeout().await,
            ServiceState::Error => {
                tracing::info!("Watchdog attempting recovery from error state");
                let _ = self
                    .enter_hotspot_mode_if(|inner| inner.state == ServiceState::Error)
                    .await;
            }
            ServiceState::Initializing => self.check_stale_initializing().await,
        }
    }

    /// `Initializing` with no network change scheduled has nobody to finish it
    async fn check_stale_initializing(&self) {
        let recovered = self
            .enter_hotspot_mode_if(|inner| {
                let stale = inner.state == ServiceState::Initializing
                    && !inner.transition_pending
                    && !inner.connection_in_progress;
                if stale {
                    tracing::warn!("Initializing with no pending transition, returning to hotspot mode");
                }
                stale
            })
            .await;
        if let Err(e) = recovered {
            tracing::warn!(error = %e, "Recovery from stale initializing failed");
        }
    }

    /// Whether another actor has deliberately taken the radio
    fn radio_claimed(&self) -> bool {
        self.connect_owns_radio() || self.scan_in_progress()
    }

    async fn check_hotspot(&self) {
        if self.radio_claimed() {
            tracing::debug!("Radio busy, skipping hotspot check");
            return;
        }

        match self.radio.is_hotspot_active().await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Watchdog could not check hotspot");
                return;
            }
        }

        tracing::warn!("Hotspot is down, re-checking before restart");
        tokio::time::sleep(self.timings.hotspot_recheck_delay).await;

        if self.current_state() != ServiceState::HotspotMode || self.radio_claimed() {
            return;
        }
        if let Ok(true) = self.radio.is_hotspot_active().await {
            return;
        }

        // A connect or scan may have claimed the radio during the re-check
        let restarted = self
            .enter_hotspot_mode_if(|inner| {
                inner.state == ServiceState::HotspotMode
                    && !inner.connection_in_progress
                    && !inner.scan_in_progress
            })
            .await;
        match restarted {
            Ok(true) => tracing::warn!("Watchdog restarted hotspot"),
            Ok(false) => tracing::debug!("Radio claimed during hotspot check, skipping restart"),
            Err(_) => {}
        }
    }

    async fn check_connection(&self) {
        match self.radio.connection_status().await {
            Ok(status) if !status.connected => {
                let _ = self
                    .enter_hotspot_mode_if(|inner| {
                        let lost = inner.state == ServiceState::Connected;
                        if lost {
                            tracing::warn!("Connection lost, returning to hotspot mode");
                        }
                        lost
                    })
                    .await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Watchdog could not read connection status"),
        }
    }

    async fn check_connect_timeout(&self) {
        let timeout = self.timings.connect_timeout;
        let _ = self
            .enter_hotspot_mode_if(|inner| {
                let expired = inner.state == ServiceState::Connecting
                    && inner
                        .target
                        .as_ref()
                        .is_some_and(|t| t.started_at.elapsed() > timeout);
                if expired {
                    tracing::warn!(timeout = ?timeout, "Connection attempt timed out, returning to hotspot mode");
                }
                expired
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::service::testing::*;
    use super::*;
    use crate::controller::simulated::RadioCall;
    use std::time::Duration;

    fn starts(h: &Harness) -> usize {
        h.radio.count(|c| matches!(c, RadioCall::StartHotspot(_)))
    }

    // Scenario E
    #[tokio::test]
    async fn restarts_dropped_hotspot() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.drop_hotspot();

        h.service.watchdog_tick().await;
        assert!(h.radio.hotspot_active());
        assert_eq!(starts(&h), 2);
    }

    // Scenario E, connection in flight
    #[tokio::test]
    async fn leaves_radio_alone_while_connecting() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.set_connect_delay(Duration::from_secs(5));
        h.service.request_connect("HomeNetwork", "secret").unwrap();
        assert!(wait_until(|| h.radio.count(|c| matches!(c, RadioCall::Connect(_))) == 1).await);

        // A late timeout write leaves HotspotMode while the worker still runs
        h.service.set_state(ServiceState::HotspotMode);
        h.service.watchdog_tick().await;
        assert_eq!(starts(&h), 1);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn leaves_radio_alone_while_scanning() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.service.lock().scan_in_progress = true;
        h.radio.drop_hotspot();

        h.service.watchdog_tick().await;
        assert!(!h.radio.hotspot_active());
        assert_eq!(starts(&h), 1);
    }

    #[tokio::test]
    async fn connect_timeout_returns_to_hotspot() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.set_connect_delay(Duration::from_secs(5));
        h.service.request_connect("HomeNetwork", "secret").unwrap();

        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::Connecting);

        tokio::time::sleep(h.service.timings.connect_timeout + Duration::from_millis(50)).await;
        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.radio.hotspot_active());
        assert!(!h.service.status().await.connecting);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn lost_connection_returns_to_hotspot() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;

        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::Connected);

        h.radio.drop_client();
        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.radio.hotspot_active());
    }

    #[tokio::test]
    async fn retries_from_error_each_tick() {
        let h = harness();
        h.radio.set_fail_hotspot_start(true);
        let _ = h.service.enter_hotspot_mode().await;

        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::Error);

        h.radio.set_fail_hotspot_start(false);
        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert_eq!(starts(&h), 3);
    }

    #[tokio::test]
    async fn recovers_stale_initializing() {
        let h = harness();
        h.service.set_state(ServiceState::Initializing);

        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
        assert!(h.radio.hotspot_active());
    }

    #[tokio::test]
    async fn leaves_scheduled_network_change_alone() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;
        h.service.request_change_network();

        h.service.watchdog_tick().await;
        assert_eq!(h.service.current_state(), ServiceState::Initializing);
        assert_eq!(starts(&h), 0);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn connect_during_hotspot_recheck_is_kept() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();
        h.radio.drop_hotspot();
        h.radio.set_hotspot_check_delay(Duration::from_millis(40));

        // The connect is accepted while the tick waits on its second check
        let tick = h.service.watchdog_tick();
        let connect = async {
            tokio::time::sleep(Duration::from_millis(65)).await;
            h.service.request_connect("HomeNetwork", "secret").unwrap();
        };
        tokio::join!(tick, connect);

        assert!(wait_until(|| !h.service.connection_in_progress()).await);
        assert_eq!(h.service.current_state(), ServiceState::Connected);
        assert_eq!(starts(&h), 1);
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let h = harness();
        h.service.set_state(ServiceState::Error);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.service.clone().run_watchdog(cancel.clone()));

        assert!(wait_until(|| h.service.current_state() == ServiceState::HotspotMode).await);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
