//! NetworkManager D-Bus radio driver
//!
//! The hotspot is a volatile NetworkManager profile in AP mode with a shared
//! IPv4 method, so NetworkManager runs DHCP and DNS for setup clients itself.

use super::radio::{RadioDriver, RadioError, RadioResult};
use super::state::{NetworkInfo, Security, WifiStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use zbus::Connection;
use zvariant::{OwnedObjectPath, Value};

/// Profile id of the setup access point
pub const HOTSPOT_CONNECTION_ID: &str = "wifi-setup-hotspot";
const HOTSPOT_PREFIX: u32 = 24;

const NM_DEST: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_IFACE: &str = "org.freedesktop.NetworkManager";
const NM_ACTIVE_IFACE: &str = "org.freedesktop.NetworkManager.Connection.Active";
const NM_DEVICE_IFACE: &str = "org.freedesktop.NetworkManager.Device";
const NM_WIFI_DEVICE_IFACE: &str = "org.freedesktop.NetworkManager.Device.Wireless";
const NM_AP_IFACE: &str = "org.freedesktop.NetworkManager.AccessPoint";
const NM_IP4_CONFIG_IFACE: &str = "org.freedesktop.NetworkManager.IP4Config";
const NM_DEVICE_TYPE_WIFI: u32 = 2;
const NM_DEVICE_STATE_ACTIVATED: u32 = 100;
const NM_DEVICE_STATE_FAILED: u32 = 120;
const NM_ACTIVE_CONNECTION_STATE_ACTIVATED: u32 = 2;
const NM_80211_AP_FLAGS_PRIVACY: u32 = 0x1;
const WIRELESS_CONNECTION_TYPE: &str = "802-11-wireless";

const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(35);
const CONNECT_ATTEMPTS: u32 = 2;

pub struct NetworkManagerRadio {
    connection: Connection,
    interface: String,
    hotspot_address: Ipv4Addr,
}

impl NetworkManagerRadio {
    /// Connect to the system bus and check that `interface` is a WiFi device
    pub async fn connect(interface: &str, hotspot_address: Ipv4Addr) -> Result<Self> {
        let connection = Connection::system()
            .await
            .context("Failed to connect to the system D-Bus")?;
        get_wifi_device_path(&connection, interface).await?;

        Ok(Self {
            connection,
            interface: interface.to_string(),
            hotspot_address,
        })
    }

    async fn device_path(&self) -> Result<OwnedObjectPath> {
        get_wifi_device_path(&self.connection, &self.interface).await
    }

    async fn nm_proxy(&self) -> Result<zbus::Proxy<'static>> {
        Ok(zbus::Proxy::new(&self.connection, NM_DEST, NM_PATH, NM_IFACE).await?)
    }

    /// Active connections bound to our interface
    async fn active_connections(&self) -> Result<Vec<ActiveConnection>> {
        let nm_proxy = self.nm_proxy().await?;
        let paths: Vec<OwnedObjectPath> = nm_proxy.get_property("ActiveConnections").await?;
        let device_path = self.device_path().await?;

        let mut active = Vec::new();
        for path in paths {
            // Connections can vanish between listing and reading them
            match read_active_connection(&self.connection, &path).await {
                Ok(conn) if conn.devices.iter().any(|d| d == &device_path) => active.push(conn),
                Ok(_) => {}
                Err(e) => tracing::debug!(path = %path.as_str(), error = %e, "Skipping active connection"),
            }
        }
        Ok(active)
    }

    async fn find_hotspot(&self) -> Result<Option<ActiveConnection>> {
        Ok(self
            .active_connections()
            .await?
            .into_iter()
            .find(|c| c.id == HOTSPOT_CONNECTION_ID))
    }

    async fn activate_hotspot(&self, ssid: &str, password: &str) -> Result<()> {
        if let Some(existing) = self.find_hotspot().await? {
            tracing::info!("Hotspot already active, restarting it");
            self.deactivate(&existing.path).await?;
        }

        let device_path = self.device_path().await?;
        let address = self.hotspot_address.to_string();
        let settings = build_hotspot_settings(ssid, password, &address);
        let nm_proxy = self.nm_proxy().await?;
        let any_ap = OwnedObjectPath::try_from("/").context("Failed to create root object path")?;

        activate_connection(&nm_proxy, &settings, device_path.clone(), any_ap)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        wait_for_device_activation(&self.connection, &device_path, ACTIVATION_TIMEOUT).await
    }

    async fn deactivate(&self, active_path: &OwnedObjectPath) -> Result<()> {
        let nm_proxy = self.nm_proxy().await?;
        nm_proxy
            .call::<_, _, ()>("DeactivateConnection", &(active_path,))
            .await
            .context("DeactivateConnection failed")
    }

    async fn join_network(&self, ssid: &str, password: &str) -> Result<()> {
        let device_path = self.device_path().await?;
        let mut last_error = String::new();

        for attempt in 1..=CONNECT_ATTEMPTS {
            tracing::info!(attempt, max_attempts = CONNECT_ATTEMPTS, ssid = %ssid, "Activating WiFi connection via D-Bus");
            request_scan_and_wait(&self.connection, &device_path).await;

            let (specific_ap, hidden) =
                match find_best_ap_for_ssid(&self.connection, &device_path, ssid).await? {
                    Some(path) => (path, false),
                    None => {
                        tracing::warn!(attempt, ssid = %ssid, "SSID not in scan list, trying hidden profile activation");
                        let any = OwnedObjectPath::try_from("/")
                            .context("Failed to create root object path")?;
                        (any, true)
                    }
                };

            let settings = build_client_settings(ssid, password, hidden);
            let nm_proxy = self.nm_proxy().await?;
            match activate_connection(&nm_proxy, &settings, device_path.clone(), specific_ap).await
            {
                Ok(()) => {
                    match wait_for_device_activation(
                        &self.connection,
                        &device_path,
                        ACTIVATION_TIMEOUT,
                    )
                    .await
                    {
                        Ok(()) => return Ok(()),
                        Err(e) => last_error = format!("{:#}", e),
                    }
                }
                Err(e) => last_error = e,
            }

            tracing::warn!(attempt, ssid = %ssid, error = %last_error, "WiFi connection attempt failed");
            if attempt < CONNECT_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }

        anyhow::bail!(
            "connection failed after {} attempts: {}",
            CONNECT_ATTEMPTS,
            last_error
        )
    }

    async fn read_status(&self) -> Result<WifiStatus> {
        let active = self.active_connections().await?;
        let Some(conn) = active.into_iter().find(|c| {
            c.connection_type == WIRELESS_CONNECTION_TYPE
                && c.state == NM_ACTIVE_CONNECTION_STATE_ACTIVATED
        }) else {
            return Ok(WifiStatus::disconnected());
        };

        let ssid = match self.active_ssid().await {
            Some(ssid) => ssid,
            None => conn.id.clone(),
        };
        let ip_address = read_ipv4_address(&self.connection, &conn.ip4_config)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "No IPv4 address on active connection");
                None
            });

        Ok(WifiStatus {
            connected: true,
            ssid: Some(ssid),
            ip_address,
            interface: Some(self.interface.clone()),
        })
    }

    async fn active_ssid(&self) -> Option<String> {
        let device_path = self.device_path().await.ok()?;
        let wifi_proxy = zbus::Proxy::new(
            &self.connection,
            NM_DEST,
            device_path.as_str(),
            NM_WIFI_DEVICE_IFACE,
        )
        .await
        .ok()?;
        let ap_path: OwnedObjectPath = wifi_proxy.get_property("ActiveAccessPoint").await.ok()?;
        if ap_path.as_str() == "/" {
            return None;
        }
        let ap_proxy = zbus::Proxy::new(&self.connection, NM_DEST, ap_path.as_str(), NM_AP_IFACE)
            .await
            .ok()?;
        let raw: Vec<u8> = ap_proxy.get_property("Ssid").await.ok()?;
        let ssid = String::from_utf8_lossy(&raw).to_string();
        (!ssid.is_empty()).then_some(ssid)
    }

    async fn list_networks(&self, rescan: bool) -> Result<Vec<NetworkInfo>> {
        let device_path = self.device_path().await?;
        if rescan {
            request_scan_and_wait(&self.connection, &device_path).await;
        }

        let ap_paths = get_access_points(&self.connection, &device_path).await?;
        let mut networks = Vec::with_capacity(ap_paths.len());
        for ap_path in ap_paths {
            if let Some(network) = read_access_point(&self.connection, &ap_path).await? {
                networks.push(network);
            }
        }

        let networks = dedupe_strongest(networks);
        tracing::debug!(count = networks.len(), rescan, "Read access points");
        Ok(networks)
    }
}

#[async_trait]
impl RadioDriver for NetworkManagerRadio {
    async fn start_hotspot(&self, ssid: &str, password: &str) -> RadioResult<()> {
        tracing::info!(interface = %self.interface, ssid = %ssid, "Starting hotspot");
        self.activate_hotspot(ssid, password)
            .await
            .map_err(|e| RadioError::HotspotStart(format!("{:#}", e)))
    }

    async fn stop_hotspot(&self) -> RadioResult<()> {
        let Some(hotspot) = self
            .find_hotspot()
            .await
            .map_err(|e| RadioError::HotspotStop(format!("{:#}", e)))?
        else {
            return Ok(());
        };
        tracing::info!(interface = %self.interface, "Stopping hotspot");
        self.deactivate(&hotspot.path)
            .await
            .map_err(|e| RadioError::HotspotStop(format!("{:#}", e)))
    }

    async fn is_hotspot_active(&self) -> RadioResult<bool> {
        let hotspot = self.find_hotspot().await?;
        Ok(hotspot.is_some_and(|c| c.state == NM_ACTIVE_CONNECTION_STATE_ACTIVATED))
    }

    async fn connect_to_network(&self, ssid: &str, password: &str) -> RadioResult<()> {
        tracing::info!(interface = %self.interface, ssid = %ssid, "Connecting to WiFi network");
        self.join_network(ssid, password)
            .await
            .map_err(|e| RadioError::ConnectFailed {
                ssid: ssid.to_string(),
                reason: format!("{:#}", e),
            })
    }

    async fn connection_status(&self) -> RadioResult<WifiStatus> {
        self.read_status()
            .await
            .map_err(|e| RadioError::Status(format!("{:#}", e)))
    }

    async fn available_networks(&self) -> RadioResult<Vec<NetworkInfo>> {
        self.list_networks(true)
            .await
            .map_err(|e| RadioError::ScanFailed(format!("{:#}", e)))
    }

    async fn cached_networks(&self) -> RadioResult<Vec<NetworkInfo>> {
        self.list_networks(false)
            .await
            .map_err(|e| RadioError::ScanFailed(format!("{:#}", e)))
    }
}

#[derive(Debug)]
struct ActiveConnection {
    path: OwnedObjectPath,
    id: String,
    connection_type: String,
    state: u32,
    devices: Vec<OwnedObjectPath>,
    ip4_config: OwnedObjectPath,
}

async fn read_active_connection(
    connection: &Connection,
    path: &OwnedObjectPath,
) -> Result<ActiveConnection> {
    let proxy = zbus::Proxy::new(connection, NM_DEST, path.as_str(), NM_ACTIVE_IFACE).await?;
    Ok(ActiveConnection {
        path: path.clone(),
        id: proxy.get_property("Id").await?,
        connection_type: proxy.get_property("Type").await?,
        state: proxy.get_property("State").await?,
        devices: proxy.get_property("Devices").await?,
        ip4_config: proxy.get_property("Ip4Config").await?,
    })
}

async fn read_ipv4_address(
    connection: &Connection,
    config_path: &OwnedObjectPath,
) -> Result<Option<String>> {
    if config_path.as_str() == "/" {
        return Ok(None);
    }
    let proxy =
        zbus::Proxy::new(connection, NM_DEST, config_path.as_str(), NM_IP4_CONFIG_IFACE).await?;
    let addresses: Vec<Vec<u32>> = proxy.get_property("Addresses").await?;
    Ok(first_address(&addresses).map(|ip| ip.to_string()))
}

/// NetworkManager's legacy `Addresses` property packs each address as
/// `[address, prefix, gateway]` with the address in network byte order.
fn first_address(addresses: &[Vec<u32>]) -> Option<Ipv4Addr> {
    addresses
        .first()
        .and_then(|entry| entry.first())
        .map(|raw| Ipv4Addr::from(raw.to_ne_bytes()))
}

async fn wait_for_device_activation(
    connection: &Connection,
    device_path: &OwnedObjectPath,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let device_proxy =
        zbus::Proxy::new(connection, NM_DEST, device_path.as_str(), NM_DEVICE_IFACE).await?;

    loop {
        let state: u32 = device_proxy.get_property("State").await?;
        if state == NM_DEVICE_STATE_ACTIVATED {
            return Ok(());
        }
        if state == NM_DEVICE_STATE_FAILED {
            let reason: (u32, u32) = device_proxy
                .get_property("StateReason")
                .await
                .unwrap_or((state, 0));
            anyhow::bail!(
                "Device activation failed: state={} reason={}",
                reason.0,
                reason.1
            );
        }

        if Instant::now() >= deadline {
            anyhow::bail!(
                "Timed out waiting for device activation (state={})",
                state
            );
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn get_wifi_device_path(connection: &Connection, interface: &str) -> Result<OwnedObjectPath> {
    let nm_proxy = zbus::Proxy::new(connection, NM_DEST, NM_PATH, NM_IFACE).await?;
    let device_path: OwnedObjectPath = nm_proxy
        .call("GetDeviceByIpIface", &(interface,))
        .await
        .with_context(|| format!("Failed to resolve NetworkManager device for '{}'", interface))?;

    let device_proxy =
        zbus::Proxy::new(connection, NM_DEST, device_path.as_str(), NM_DEVICE_IFACE).await?;
    let device_type: u32 = device_proxy.get_property("DeviceType").await?;
    if device_type != NM_DEVICE_TYPE_WIFI {
        anyhow::bail!(
            "Interface '{}' is not a WiFi device according to NetworkManager (type={})",
            interface,
            device_type
        );
    }

    Ok(device_path)
}

async fn request_scan_and_wait(connection: &Connection, device_path: &OwnedObjectPath) {
    let Ok(wifi_proxy) = zbus::Proxy::new(
        connection,
        NM_DEST,
        device_path.as_str(),
        NM_WIFI_DEVICE_IFACE,
    )
    .await
    else {
        return;
    };

    let last_scan_before: i64 = wifi_proxy.get_property("LastScan").await.unwrap_or(-1);

    let options = HashMap::<&str, Value>::new();
    if let Err(e) = wifi_proxy
        .call::<_, _, ()>("RequestScan", &(options,))
        .await
    {
        tracing::debug!(error = %e, "RequestScan rejected, using existing results");
        return;
    }

    let scan_deadline = Instant::now() + Duration::from_secs(6);
    while Instant::now() < scan_deadline {
        let last_scan_now: i64 = wifi_proxy.get_property("LastScan").await.unwrap_or(-1);
        if last_scan_now > last_scan_before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
}

async fn get_access_points(
    connection: &Connection,
    device_path: &OwnedObjectPath,
) -> Result<Vec<OwnedObjectPath>> {
    let wifi_proxy = zbus::Proxy::new(
        connection,
        NM_DEST,
        device_path.as_str(),
        NM_WIFI_DEVICE_IFACE,
    )
    .await?;

    let ap_paths: Vec<OwnedObjectPath> = wifi_proxy.call("GetAllAccessPoints", &()).await?;
    Ok(ap_paths)
}

async fn read_access_point(
    connection: &Connection,
    ap_path: &OwnedObjectPath,
) -> Result<Option<NetworkInfo>> {
    let ap_proxy = zbus::Proxy::new(connection, NM_DEST, ap_path.as_str(), NM_AP_IFACE).await?;

    let ssid_raw: Vec<u8> = ap_proxy.get_property("Ssid").await?;
    let ssid = String::from_utf8_lossy(&ssid_raw).trim_matches('\0').to_string();
    if ssid.is_empty() {
        return Ok(None);
    }

    let signal_strength: u8 = ap_proxy.get_property("Strength").await.unwrap_or(0);
    let frequency: u32 = ap_proxy.get_property("Frequency").await.unwrap_or(0);
    let flags: u32 = ap_proxy.get_property("Flags").await.unwrap_or(0);
    let wpa_flags: u32 = ap_proxy.get_property("WpaFlags").await.unwrap_or(0);
    let rsn_flags: u32 = ap_proxy.get_property("RsnFlags").await.unwrap_or(0);

    Ok(Some(NetworkInfo {
        ssid,
        signal_strength: signal_strength.min(100),
        security: classify_security(flags, wpa_flags, rsn_flags),
        frequency: frequency_band(frequency),
    }))
}

async fn find_best_ap_for_ssid(
    connection: &Connection,
    device_path: &OwnedObjectPath,
    ssid: &str,
) -> Result<Option<OwnedObjectPath>> {
    let ap_paths = get_access_points(connection, device_path).await?;
    let mut best: Option<(OwnedObjectPath, u8)> = None;

    for ap_path in ap_paths {
        let ap_proxy = zbus::Proxy::new(connection, NM_DEST, ap_path.as_str(), NM_AP_IFACE).await?;
        let ssid_raw: Vec<u8> = ap_proxy.get_property("Ssid").await.unwrap_or_default();
        if String::from_utf8_lossy(&ssid_raw) != ssid {
            continue;
        }

        let strength: u8 = ap_proxy.get_property("Strength").await.unwrap_or(0);
        match &best {
            Some((_, best_strength)) if *best_strength >= strength => {}
            _ => best = Some((ap_path, strength)),
        }
    }

    Ok(best.map(|(path, _)| path))
}

type Settings<'a> = HashMap<&'static str, HashMap<&'static str, Value<'a>>>;

fn base_settings<'a>(id: &'a str, ssid: &'a str, mode: &'static str) -> Settings<'a> {
    let mut conn_settings = HashMap::new();
    conn_settings.insert("type", Value::from(WIRELESS_CONNECTION_TYPE));
    conn_settings.insert("id", Value::from(id));
    conn_settings.insert("uuid", Value::from(uuid::Uuid::new_v4().to_string()));
    conn_settings.insert("autoconnect", Value::from(false));

    let mut wifi_settings = HashMap::new();
    wifi_settings.insert("ssid", Value::from(ssid.as_bytes().to_vec()));
    wifi_settings.insert("mode", Value::from(mode));

    let mut settings = HashMap::new();
    settings.insert("connection", conn_settings);
    settings.insert(WIRELESS_CONNECTION_TYPE, wifi_settings);
    settings
}

fn security_settings(password: &str) -> HashMap<&'static str, Value<'_>> {
    let mut security = HashMap::new();
    security.insert("key-mgmt", Value::from("wpa-psk"));
    security.insert("psk", Value::from(password));
    security
}

fn build_client_settings<'a>(ssid: &'a str, password: &'a str, hidden: bool) -> Settings<'a> {
    let mut settings = base_settings(ssid, ssid, "infrastructure");
    if hidden {
        if let Some(wifi) = settings.get_mut(WIRELESS_CONNECTION_TYPE) {
            wifi.insert("hidden", Value::from(true));
        }
    }

    let mut ipv4_settings = HashMap::new();
    ipv4_settings.insert("method", Value::from("auto"));
    let mut ipv6_settings = HashMap::new();
    ipv6_settings.insert("method", Value::from("auto"));
    settings.insert("ipv4", ipv4_settings);
    settings.insert("ipv6", ipv6_settings);

    if !password.is_empty() {
        settings.insert("802-11-wireless-security", security_settings(password));
    }
    settings
}

fn build_hotspot_settings<'a>(ssid: &'a str, password: &'a str, address: &'a str) -> Settings<'a> {
    let mut settings = base_settings(HOTSPOT_CONNECTION_ID, ssid, "ap");
    if let Some(wifi) = settings.get_mut(WIRELESS_CONNECTION_TYPE) {
        wifi.insert("band", Value::from("bg"));
    }

    let mut address_entry: HashMap<&str, Value> = HashMap::new();
    address_entry.insert("address", Value::from(address));
    address_entry.insert("prefix", Value::from(HOTSPOT_PREFIX));

    let mut ipv4_settings = HashMap::new();
    ipv4_settings.insert("method", Value::from("shared"));
    ipv4_settings.insert("address-data", Value::from(vec![address_entry]));
    let mut ipv6_settings = HashMap::new();
    ipv6_settings.insert("method", Value::from("ignore"));
    settings.insert("ipv4", ipv4_settings);
    settings.insert("ipv6", ipv6_settings);

    settings.insert("802-11-wireless-security", security_settings(password));
    settings
}

async fn activate_connection(
    nm_proxy: &zbus::Proxy<'_>,
    settings: &Settings<'_>,
    device_path: OwnedObjectPath,
    specific_ap: OwnedObjectPath,
) -> std::result::Result<(), String> {
    let mut options: HashMap<&str, Value> = HashMap::new();
    options.insert("persist", Value::from("volatile"));

    let v2_result: std::result::Result<
        (
            OwnedObjectPath,
            OwnedObjectPath,
            HashMap<String, zvariant::OwnedValue>,
        ),
        zbus::Error,
    > = nm_proxy
        .call(
            "AddAndActivateConnection2",
            &(settings, &device_path, &specific_ap, options),
        )
        .await;

    match v2_result {
        Ok(_) => Ok(()),
        Err(zbus::Error::MethodError(name, _, _))
            if name.as_str() == "org.freedesktop.DBus.Error.UnknownMethod" =>
        {
            let legacy: std::result::Result<(OwnedObjectPath, OwnedObjectPath), zbus::Error> =
                nm_proxy
                    .call(
                        "AddAndActivateConnection",
                        &(settings, &device_path, &specific_ap),
                    )
                    .await;
            legacy.map(|_| ()).map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Keep the strongest entry per SSID, strongest first
fn dedupe_strongest(networks: Vec<NetworkInfo>) -> Vec<NetworkInfo> {
    let mut by_ssid = HashMap::<String, NetworkInfo>::new();
    for network in networks {
        by_ssid
            .entry(network.ssid.clone())
            .and_modify(|existing| {
                if network.signal_strength > existing.signal_strength {
                    *existing = network.clone();
                }
            })
            .or_insert(network);
    }

    let mut networks: Vec<_> = by_ssid.into_values().collect();
    networks.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
    networks
}

fn classify_security(flags: u32, wpa_flags: u32, rsn_flags: u32) -> Security {
    if (flags & NM_80211_AP_FLAGS_PRIVACY) != 0 || wpa_flags != 0 || rsn_flags != 0 {
        Security::Encrypted
    } else {
        Security::Open
    }
}

fn frequency_band(freq: u32) -> String {
    match freq {
        2400..=2500 => "2.4 GHz".to_string(),
        4900..=5900 => "5 GHz".to_string(),
        5925..=7125 => "6 GHz".to_string(),
        0 => "unknown".to_string(),
        other => format!("{} MHz", other),
    }
}

#[derive(Debug, Clone)]
struct WirelessInterface {
    name: String,
    driver_bound: bool,
}

/// Resolve the wireless interface to manage.
///
/// `auto` picks the first wireless interface with a bound driver. An explicit
/// name that does not exist falls back to the only viable interface if there
/// is exactly one.
pub fn resolve_wireless_interface(configured: &str) -> Result<String> {
    choose_interface(configured, &list_wireless_interfaces())
}

fn choose_interface(configured: &str, interfaces: &[WirelessInterface]) -> Result<String> {
    let configured = configured.trim();
    let mut viable: Vec<&WirelessInterface> = interfaces
        .iter()
        .filter(|iface| iface.driver_bound && !iface.name.starts_with("p2p-"))
        .collect();
    viable.sort_by(|a, b| a.name.cmp(&b.name));

    if configured.eq_ignore_ascii_case("auto") || configured.is_empty() {
        let Some(iface) = viable.first() else {
            anyhow::bail!("No usable wireless interfaces detected");
        };
        tracing::info!(interface = %iface.name, "Auto-selected wireless interface");
        return Ok(iface.name.clone());
    }

    if let Some(iface) = interfaces.iter().find(|iface| iface.name == configured) {
        if !iface.driver_bound {
            anyhow::bail!(
                "Wireless interface '{}' has no kernel driver bound",
                iface.name
            );
        }
        return Ok(iface.name.clone());
    }

    match viable.as_slice() {
        [only] => {
            tracing::warn!(
                configured = configured,
                detected = %only.name,
                "Configured interface not found; falling back to detected wireless interface"
            );
            Ok(only.name.clone())
        }
        [] => anyhow::bail!(
            "Configured interface '{}' was not found and no wireless interfaces were detected",
            configured
        ),
        many => {
            let names = many
                .iter()
                .map(|iface| iface.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            anyhow::bail!(
                "Configured interface '{}' was not found. Detected wireless interfaces: {}",
                configured,
                names
            )
        }
    }
}

fn list_wireless_interfaces() -> Vec<WirelessInterface> {
    let Ok(entries) = fs::read_dir("/sys/class/net") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|entry| entry.path().join("wireless").exists())
        .map(|entry| WirelessInterface {
            name: entry.file_name().to_string_lossy().to_string(),
            driver_bound: entry.path().join("device/driver").exists(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, driver_bound: bool) -> WirelessInterface {
        WirelessInterface {
            name: name.to_string(),
            driver_bound,
        }
    }

    fn network(ssid: &str, signal: u8) -> NetworkInfo {
        NetworkInfo {
            ssid: ssid.to_string(),
            signal_strength: signal,
            security: Security::Encrypted,
            frequency: "2.4 GHz".to_string(),
        }
    }

    #[test]
    fn auto_picks_first_bound_interface() {
        let interfaces = [iface("wlan1", true), iface("p2p-dev-wlan0", true), iface("wlan0", true)];
        assert_eq!(choose_interface("auto", &interfaces).unwrap(), "wlan0");
    }

    #[test]
    fn missing_interface_falls_back_to_single_viable() {
        let interfaces = [iface("wlp2s0", true), iface("wlan9", false)];
        assert_eq!(choose_interface("wlan0", &interfaces).unwrap(), "wlp2s0");
    }

    #[test]
    fn unbound_interface_is_rejected() {
        let interfaces = [iface("wlan0", false)];
        assert!(choose_interface("wlan0", &interfaces).is_err());
        assert!(choose_interface("auto", &interfaces).is_err());
    }

    #[test]
    fn decodes_network_order_address() {
        let raw = u32::from_ne_bytes([192, 168, 4, 1]);
        assert_eq!(
            first_address(&[vec![raw, 24, 0]]),
            Some(Ipv4Addr::new(192, 168, 4, 1))
        );
        assert_eq!(first_address(&[]), None);
    }

    #[test]
    fn privacy_or_wpa_flags_mean_encrypted() {
        assert_eq!(classify_security(0, 0, 0), Security::Open);
        assert_eq!(classify_security(NM_80211_AP_FLAGS_PRIVACY, 0, 0), Security::Encrypted);
        assert_eq!(classify_security(0, 0, 0x188), Security::Encrypted);
    }

    #[test]
    fn frequency_maps_to_band() {
        assert_eq!(frequency_band(2437), "2.4 GHz");
        assert_eq!(frequency_band(5180), "5 GHz");
        assert_eq!(frequency_band(6115), "6 GHz");
        assert_eq!(frequency_band(0), "unknown");
    }

    #[test]
    fn dedupe_keeps_strongest_per_ssid() {
        let networks = dedupe_strongest(vec![
            network("Home", 40),
            network("Cafe", 55),
            network("Home", 70),
        ]);
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].ssid, "Home");
        assert_eq!(networks[0].signal_strength, 70);
    }

    #[test]
    fn hotspot_profile_is_shared_ap() {
        let settings = build_hotspot_settings("DistillerSetup", "setup123", "192.168.4.1");
        assert_eq!(settings["802-11-wireless"]["mode"], Value::from("ap"));
        assert_eq!(settings["ipv4"]["method"], Value::from("shared"));
        assert_eq!(settings["connection"]["id"], Value::from(HOTSPOT_CONNECTION_ID));
        assert!(settings.contains_key("802-11-wireless-security"));
    }

    #[test]
    fn open_client_profile_has_no_security_section() {
        let settings = build_client_settings("CoffeeShop", "", false);
        assert!(!settings.contains_key("802-11-wireless-security"));
        assert!(!settings["802-11-wireless"].contains_key("hidden"));
    }
}
