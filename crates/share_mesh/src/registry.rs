//! Live registry of discovered devices.
//!
//! Written only by the discovery task, read by request handlers through an
//! `Arc<RwLock<DeviceRegistry>>`. The local device is never stored here;
//! self-liveness is handled by the liveness filter.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::LIVENESS_TIMEOUT;

/// A peer seen on the LAN within the liveness window.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub address: String,
    pub port: u16,
    pub last_seen: Instant,
}

pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    liveness_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::with_timeout(LIVENESS_TIMEOUT)
    }

    pub fn with_timeout(liveness_timeout: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            liveness_timeout,
        }
    }

    /// Add or refresh a device. Returns true if newly added.
    pub fn upsert(&mut self, device_id: &str, address: &str, port: u16) -> bool {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.address = address.to_string();
            device.port = port;
            device.last_seen = Instant::now();
            return false;
        }

        self.devices.insert(
            device_id.to_string(),
            Device {
                device_id: device_id.to_string(),
                address: address.to_string(),
                port,
                last_seen: Instant::now(),
            },
        );
        true
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn remove(&mut self, device_id: &str) -> Option<Device> {
        self.devices.remove(device_id)
    }

    /// Drop every device not seen within the liveness timeout.
    pub fn prune(&mut self) {
        let timeout = self.liveness_timeout;
        let now = Instant::now();
        self.devices
            .retain(|_, d| now.duration_since(d.last_seen) <= timeout);
    }

    fn is_live(&self, device: &Device, now: Instant) -> bool {
        now.duration_since(device.last_seen) <= self.liveness_timeout
    }

    /// Snapshot of currently-live devices, ordered by device_id.
    ///
    /// Expired entries are excluded even before the next prune sweep removes
    /// them, so eviction is observable on the first read after the timeout.
    pub fn snapshot(&self) -> Vec<Device> {
        let now = Instant::now();
        let mut devices: Vec<Device> = self
            .devices
            .values()
            .filter(|d| self.is_live(d, now))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// The device_ids of currently-live devices.
    pub fn live_ids(&self) -> HashSet<String> {
        let now = Instant::now();
        self.devices
            .values()
            .filter(|d| self.is_live(d, now))
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
