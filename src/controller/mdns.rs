//! mDNS advertisement on the joined network
//!
//! Once the device is on the user's network it announces itself as
//! `<hostname>.local` with an `_http._tcp` record pointing at the portal, and
//! withdraws the record when it goes back to hotspot mode.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

const SERVICE_TYPE: &str = "_http._tcp.local.";

/// Announces the device on the client network
pub trait Advertiser: Send + Sync {
    fn advertise(&self, address: Ipv4Addr, port: u16);
    fn withdraw(&self);
}

/// Used with `--no-mdns` and in simulation
pub struct NullAdvertiser;

impl Advertiser for NullAdvertiser {
    fn advertise(&self, _address: Ipv4Addr, _port: u16) {}
    fn withdraw(&self) {}
}

struct Registration {
    daemon: ServiceDaemon,
    fullname: String,
}

pub struct MdnsAdvertiser {
    hostname: String,
    device_name: String,
    active: Mutex<Option<Registration>>,
}

impl MdnsAdvertiser {
    pub fn new(hostname: &str, device_name: &str) -> Self {
        Self {
            hostname: hostname.trim_end_matches(".local").to_string(),
            device_name: device_name.to_string(),
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Registration>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, address: Ipv4Addr, port: u16) -> Result<Registration, mdns_sd::Error> {
        let daemon = ServiceDaemon::new()?;
        let host = format!("{}.local.", self.hostname);
        let ip = address.to_string();
        let properties = [
            ("description", self.device_name.as_str()),
            ("path", "/"),
            ("device", "distiller"),
        ];
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &self.hostname,
            &host,
            ip.as_str(),
            port,
            &properties[..],
        )?;
        let fullname = info.get_fullname().to_string();

        if let Err(e) = daemon.register(info) {
            let _ = daemon.shutdown();
            return Err(e);
        }
        Ok(Registration { daemon, fullname })
    }
}

fn unregister(registration: Registration) {
    if let Err(e) = registration.daemon.unregister(&registration.fullname) {
        tracing::warn!(error = %e, "Failed to unregister mDNS service");
    }
    if let Err(e) = registration.daemon.shutdown() {
        tracing::warn!(error = %e, "Failed to stop mDNS daemon");
    }
}

impl Advertiser for MdnsAdvertiser {
    fn advertise(&self, address: Ipv4Addr, port: u16) {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            unregister(previous);
        }

        match self.register(address, port) {
            Ok(registration) => {
                tracing::info!(
                    host = %format!("{}.local", self.hostname),
                    address = %address,
                    port,
                    "mDNS service registered"
                );
                *active = Some(registration);
            }
            Err(e) => tracing::error!(error = %e, "Failed to start mDNS service"),
        }
    }

    fn withdraw(&self) {
        if let Some(registration) = self.lock().take() {
            unregister(registration);
            tracing::info!("mDNS service stopped");
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.withdraw();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Remembers the current advertisement
    #[derive(Default)]
    pub struct RecordingAdvertiser {
        current: Mutex<Option<(Ipv4Addr, u16)>>,
    }

    impl RecordingAdvertiser {
        pub fn advertised(&self) -> Option<(Ipv4Addr, u16)> {
            *self.current.lock().unwrap()
        }
    }

    impl Advertiser for RecordingAdvertiser {
        fn advertise(&self, address: Ipv4Addr, port: u16) {
            *self.current.lock().unwrap() = Some((address, port));
        }

        fn withdraw(&self) {
            *self.current.lock().unwrap() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_drops_local_suffix() {
        let advertiser = MdnsAdvertiser::new("distiller.local", "Distiller");
        assert_eq!(advertiser.hostname, "distiller");
    }

    #[test]
    fn withdraw_without_registration_is_noop() {
        let advertiser = MdnsAdvertiser::new("distiller", "Distiller");
        advertiser.withdraw();
        assert!(advertiser.lock().is_none());
    }
}
