//! Distiller WiFi - single-radio WiFi provisioning daemon
//!
//! This binary provides two modes:
//! - `daemon`: Runs the WiFi controller, hotspot, and setup portal
//! - `status`: Quick status check (for scripts)

mod controller;
mod display;
mod web;

use clap::{Parser, Subcommand};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_SOCKET: &str = "/run/distiller-wifi.sock";
const LOG_FILE_PATHS: [&str; 2] = ["/var/log/distiller-wifi.log", "distiller-wifi.log"];

#[derive(Parser)]
#[command(name = "distiller-wifi")]
#[command(about = "WiFi provisioning through a setup hotspot", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WiFi setup daemon (controller + web portal)
    Daemon {
        /// Hotspot SSID
        #[arg(long, default_value = "DistillerSetup")]
        ssid: String,

        /// Hotspot password
        #[arg(long, default_value = "setup123")]
        password: String,

        /// Device name shown on the portal and display
        #[arg(long, default_value = "Distiller")]
        device_name: String,

        /// Web portal port
        #[arg(long, default_value = "8080")]
        port: u16,

        /// WiFi interface to manage
        #[arg(long, default_value = "auto")]
        interface: String,

        /// Hotspot gateway address
        #[arg(long, default_value = "192.168.4.1")]
        hotspot_address: String,

        /// Disable the status display
        #[arg(long)]
        no_eink: bool,

        /// Hostname advertised over mDNS once connected
        #[arg(long, default_value = "distiller")]
        mdns_hostname: String,

        /// Do not advertise the device over mDNS
        #[arg(long)]
        no_mdns: bool,

        /// Run against an in-memory radio instead of NetworkManager
        #[arg(long)]
        simulate: bool,

        /// Unix socket path for status queries
        #[arg(long, default_value = DEFAULT_SOCKET)]
        socket: PathBuf,
    },

    /// Check current status
    Status {
        /// Unix socket path for daemon communication
        #[arg(long, default_value = DEFAULT_SOCKET)]
        socket: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_to_file = matches!(cli.command, Commands::Daemon { .. });
    init_tracing(cli.verbose, log_to_file);

    match cli.command {
        Commands::Daemon {
            ssid,
            password,
            device_name,
            port,
            interface,
            hotspot_address,
            no_eink,
            mdns_hostname,
            no_mdns,
            simulate,
            socket,
        } => {
            tracing::info!("Starting Distiller WiFi daemon");
            controller::run_daemon(controller::DaemonConfig {
                interface,
                ssid,
                password,
                device_name,
                port,
                hotspot_address,
                display_enabled: !no_eink,
                mdns_hostname,
                mdns_enabled: !no_mdns,
                simulate,
                socket_path: socket,
            })
            .await?;
        }
        Commands::Status { socket } => {
            controller::print_status(&socket).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, log_to_file: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = log_to_file.then(open_log_file).flatten().map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}

/// First writable log file, or none
fn open_log_file() -> Option<File> {
    LOG_FILE_PATHS.iter().find_map(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(path))
            .ok()
    })
}
