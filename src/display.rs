//! Status display notifications
//!
//! The controller reports setup, connecting and connected transitions here.
//! Notifiers are best-effort: they must not block and their failures never
//! reach the controller.

use qrcode::render::unicode;
use qrcode::QrCode;

pub trait DisplayNotifier: Send + Sync {
    fn on_enter_setup(&self);
    fn on_connecting(&self, ssid: &str);
    fn on_connected(&self, ssid: &str, ip_address: &str);
}

/// Used when the display is disabled
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplayNotifier for NullDisplay {
    fn on_enter_setup(&self) {}
    fn on_connecting(&self, _ssid: &str) {}
    fn on_connected(&self, _ssid: &str, _ip_address: &str) {}
}

/// Renders setup information to the terminal, including a QR code pointing
/// at the setup portal.
#[derive(Debug)]
pub struct TerminalDisplay {
    device_name: String,
    hotspot_ssid: String,
    setup_url: String,
}

impl TerminalDisplay {
    pub fn new(device_name: &str, hotspot_ssid: &str, setup_url: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            hotspot_ssid: hotspot_ssid.to_string(),
            setup_url: setup_url.to_string(),
        }
    }
}

impl DisplayNotifier for TerminalDisplay {
    fn on_enter_setup(&self) {
        tracing::info!(
            device = %self.device_name,
            ssid = %self.hotspot_ssid,
            url = %self.setup_url,
            "Setup mode: join the hotspot and open the setup page"
        );
        match render_qr(&self.setup_url) {
            Ok(qr) => eprintln!("{}", qr),
            Err(e) => tracing::warn!(error = %e, "Failed to render setup QR code"),
        }
    }

    fn on_connecting(&self, ssid: &str) {
        tracing::info!(device = %self.device_name, ssid = %ssid, "Display: connecting");
    }

    fn on_connected(&self, ssid: &str, ip_address: &str) {
        tracing::info!(
            device = %self.device_name,
            ssid = %ssid,
            ip = %ip_address,
            "Display: connected"
        );
    }
}

/// Render `data` as a compact unicode QR code
pub fn render_qr(data: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
