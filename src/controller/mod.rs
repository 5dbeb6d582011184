//! WiFi controller - radio ownership, provisioning state machine and the
//! daemon that wires it to the web portal

pub mod ipc;
pub mod mdns;
mod network_manager;
pub mod radio;
mod scan;
pub mod service;
pub mod simulated;
pub mod state;
mod watchdog;
mod worker;

pub use service::{ServiceConfig, ServiceError, Timings, WifiService};
pub use state::{NetworkInfo, ServiceState, StatusSnapshot};

use crate::display::{DisplayNotifier, NullDisplay, TerminalDisplay};
use anyhow::{Context, Result};
use radio::RadioDriver;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Daemon configuration
pub struct DaemonConfig {
    pub interface: String,
    pub ssid: String,
    pub password: String,
    pub device_name: String,
    pub port: u16,
    pub hotspot_address: String,
    pub display_enabled: bool,
    pub mdns_hostname: String,
    pub mdns_enabled: bool,
    pub simulate: bool,
    pub socket_path: PathBuf,
}

/// Run the daemon until SIGINT or SIGTERM
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    if config.password.len() < 8 {
        anyhow::bail!("Hotspot password must be at least 8 characters for WPA2");
    }
    let hotspot_address: Ipv4Addr = config
        .hotspot_address
        .parse()
        .with_context(|| format!("Invalid hotspot address: '{}'", config.hotspot_address))?;

    let radio: Arc<dyn RadioDriver> = if config.simulate {
        tracing::warn!("Running against the simulated radio");
        Arc::new(simulated::SimulatedRadio::with_sample_networks())
    } else {
        let interface = network_manager::resolve_wireless_interface(&config.interface)?;
        Arc::new(network_manager::NetworkManagerRadio::connect(&interface, hotspot_address).await?)
    };

    let service_config = ServiceConfig {
        hotspot_ssid: config.ssid.clone(),
        hotspot_password: config.password.clone(),
        device_name: config.device_name.clone(),
        port: config.port,
        hotspot_address: hotspot_address.to_string(),
    };

    let display: Arc<dyn DisplayNotifier> = if config.display_enabled {
        Arc::new(TerminalDisplay::new(
            &service_config.device_name,
            &service_config.hotspot_ssid,
            &service_config.setup_url(),
        ))
    } else {
        Arc::new(NullDisplay)
    };

    tracing::info!(
        device = %service_config.device_name,
        ssid = %service_config.hotspot_ssid,
        port = service_config.port,
        "Initializing WiFi service"
    );

    let advertiser: Arc<dyn mdns::Advertiser> = if config.mdns_enabled && !config.simulate {
        Arc::new(mdns::MdnsAdvertiser::new(
            &config.mdns_hostname,
            &service_config.device_name,
        ))
    } else {
        Arc::new(mdns::NullAdvertiser)
    };

    let service = WifiService::new(
        radio,
        display.clone(),
        advertiser.clone(),
        service_config,
        Timings::default(),
    );

    match service.determine_initial_state().await {
        ServiceState::Connected => {
            let status = service.status().await;
            if let Some(addr) = status.ip_address.as_deref().and_then(|ip| ip.parse().ok()) {
                advertiser.advertise(addr, config.port);
            }
            display.on_connected(
                status.ssid.as_deref().unwrap_or("unknown"),
                status.ip_address.as_deref().unwrap_or("unknown"),
            );
        }
        _ => {
            if let Err(e) = service.enter_hotspot_mode().await {
                tracing::error!(error = %e, "Initial hotspot start failed, watchdog will retry");
            }
        }
    }

    let listener = ipc::bind(&config.socket_path)?;
    tracing::info!(path = %config.socket_path.display(), "IPC server listening");
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(listener, service.clone()));

    let mut web_handle = tokio::spawn(crate::web::run_server(service.clone()));

    let cancel = CancellationToken::new();
    let watchdog_handle = tokio::spawn(service.clone().run_watchdog(cancel.clone()));

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut web_handle => {
            match result {
                Ok(Ok(())) => tracing::warn!("Web server exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "Web server failed"),
                Err(e) => tracing::error!(error = %e, "Web server task failed"),
            }
        }
    }

    tracing::info!("Cleaning up...");
    cancel.cancel();
    let _ = watchdog_handle.await;
    ipc_handle.abort();
    web_handle.abort();
    service.shutdown().await;
    let _ = std::fs::remove_file(&config.socket_path);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Print current status (for CLI)
pub async fn print_status(socket_path: &Path) -> Result<()> {
    match ipc::get_status(socket_path).await {
        Ok(status) => {
            println!("WiFi Setup Status");
            println!("=================");
            println!("State: {}", status.current_state);
            if status.connected {
                println!(
                    "Connected to: {} ({})",
                    status.ssid.as_deref().unwrap_or("unknown"),
                    status.ip_address.as_deref().unwrap_or("no address")
                );
            }
            if status.connecting {
                println!(
                    "Connecting to: {} ({}s)",
                    status.target_ssid.as_deref().unwrap_or("unknown"),
                    status.elapsed_seconds
                );
            }
            if let Some(url) = &status.redirect_url {
                println!("Reachable at: {}", url);
            }
            if let Some(message) = &status.message {
                println!("{}", message);
            }
            if let Some(error) = &status.error {
                println!("Error: {}", error);
            }
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            eprintln!("Is the daemon running?");
        }
    }
    Ok(())
}
