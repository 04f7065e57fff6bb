//! mDNS advertisement of this device.
//!
//! Registers `_lanshare._tcp.local.` with the device_id in the TXT record so
//! peers can tell devices apart without resolving further.

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

use crate::{PROP_DEVICE_ID, SERVICE_TYPE};

/// A registered advertisement. Withdraw it on shutdown; dropping without
/// withdrawing leaves the record to expire on its own TTL.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
    active: bool,
}

/// Register this device on mDNS so other LAN peers can discover it.
pub fn advertise(daemon: &ServiceDaemon, device_id: &str, port: u16) -> Result<Advertisement> {
    let host = host_name();
    let instance_name = format!("{device_id}.{host}");

    let properties = [(PROP_DEVICE_ID.to_string(), device_id.to_string())];

    let service = ServiceInfo::new(
        SERVICE_TYPE,
        &instance_name,
        &format!("{host}.local."),
        "",
        port,
        &properties[..],
    )
    .context("create mDNS service info")?;

    let fullname = service.get_fullname().to_string();
    daemon.register(service).context("register mDNS service")?;

    info!("mDNS: advertising {device_id} on port {port}");

    Ok(Advertisement {
        daemon: daemon.clone(),
        fullname,
        active: true,
    })
}

impl Advertisement {
    /// Withdraw the advertisement. Safe to call more than once.
    pub fn withdraw(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("mDNS: failed to unregister {}: {e}", self.fullname);
        } else {
            info!("mDNS: withdrew {}", self.fullname);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "lanshare-device".into())
}
