//! Continuous LAN browse feeding the device registry.
//!
//! A background task consumes mDNS browse events, upserting every resolved
//! peer, and sweeps expired entries on a fixed interval. The task exits when
//! the shutdown signal fires or the browse channel closes.

use std::sync::Arc;

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::registry::DeviceRegistry;
use crate::{PROP_DEVICE_ID, PRUNE_INTERVAL, SERVICE_TYPE};

/// Browse for peers on the LAN and keep `registry` current.
///
/// The returned handle completes once `shutdown` is signalled.
pub fn start_discovery(
    daemon: &ServiceDaemon,
    registry: Arc<RwLock<DeviceRegistry>>,
    own_device_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    let receiver = daemon.browse(SERVICE_TYPE).context("start mDNS browse")?;

    let handle = tokio::spawn(async move {
        let mut sweep = tokio::time::interval(PRUNE_INTERVAL);
        sweep.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("mDNS: discovery shutting down");
                    break;
                }
                _ = sweep.tick() => {
                    registry.write().await.prune();
                }
                event = receiver.recv_async() => {
                    match event {
                        Ok(event) => handle_event(&registry, &own_device_id, event).await,
                        Err(_) => {
                            debug!("mDNS: browse channel closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(handle)
}

async fn handle_event(registry: &RwLock<DeviceRegistry>, own_device_id: &str, event: ServiceEvent) {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let device_id = info
                .get_properties()
                .get(PROP_DEVICE_ID)
                .map(|v| v.val_str().to_string())
                .unwrap_or_default();

            if device_id.is_empty() || device_id == own_device_id {
                return;
            }

            let port = info.get_port();
            let addresses = info.get_addresses();
            if let Some(addr) = addresses.iter().next() {
                let addr_str = addr.to_string();
                let mut reg = registry.write().await;
                let is_new = reg.upsert(&device_id, &addr_str, port);
                if is_new {
                    info!("mDNS: discovered device {device_id} at {addr_str}:{port}");
                } else {
                    debug!("mDNS: refreshed device {device_id} at {addr_str}:{port}");
                }
            }
        }
        ServiceEvent::ServiceRemoved(_type, fullname) => {
            // Eviction is timeout-driven; a goodbye packet just means the
            // device stops being refreshed.
            debug!("mDNS: service removed: {fullname}");
        }
        ServiceEvent::SearchStarted(_) => {
            debug!("mDNS: browse started");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_sd::ServiceInfo;

    fn resolved_event(device_id: &str, ip: &str, port: u16) -> ServiceEvent {
        let properties = [(PROP_DEVICE_ID.to_string(), device_id.to_string())];
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &format!("{device_id}.test-host"),
            "test-host.local.",
            ip,
            port,
            &properties[..],
        )
        .unwrap();
        ServiceEvent::ServiceResolved(info)
    }

    #[tokio::test]
    async fn resolved_peer_is_upserted() {
        let registry = RwLock::new(DeviceRegistry::new());

        handle_event(&registry, "self-id", resolved_event("peer-1", "192.168.1.20", 8080)).await;

        let reg = registry.read().await;
        let device = reg.get("peer-1").unwrap();
        assert_eq!(device.address, "192.168.1.20");
        assert_eq!(device.port, 8080);
    }

    #[tokio::test]
    async fn own_advertisement_is_ignored() {
        let registry = RwLock::new(DeviceRegistry::new());

        handle_event(&registry, "self-id", resolved_event("self-id", "192.168.1.20", 8080)).await;

        assert!(registry.read().await.is_empty());
    }

    #[tokio::test]
    async fn missing_device_id_is_ignored() {
        let registry = RwLock::new(DeviceRegistry::new());
        let properties: [(String, String); 0] = [];
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            "anonymous.test-host",
            "test-host.local.",
            "192.168.1.30",
            8080,
            &properties[..],
        )
        .unwrap();

        handle_event(&registry, "self-id", ServiceEvent::ServiceResolved(info)).await;

        assert!(registry.read().await.is_empty());
    }

    #[tokio::test]
    async fn removed_event_does_not_evict() {
        let registry = RwLock::new(DeviceRegistry::new());
        handle_event(&registry, "self-id", resolved_event("peer-1", "192.168.1.20", 8080)).await;

        handle_event(
            &registry,
            "self-id",
            ServiceEvent::ServiceRemoved(SERVICE_TYPE.into(), "peer-1.test-host".into()),
        )
        .await;

        // Still present; only the liveness timeout evicts.
        assert!(registry.read().await.get("peer-1").is_some());
    }
}
