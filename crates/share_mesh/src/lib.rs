//! LAN discovery and session federation.
//!
//! Each device registers a service `_lanshare._tcp.local.` carrying its
//! device_id, browses for the same service to maintain a live registry of
//! peers, and federates session lists by fetching every live peer's
//! locally-hosted sessions over HTTP.

use std::time::Duration;

pub mod advertise;
pub mod discovery;
pub mod federate;
pub mod filter;
pub mod registry;

pub use advertise::{advertise, Advertisement};
pub use discovery::start_discovery;
pub use federate::{federate_sessions, HttpPeerClient, MockPeerClient, PeerAddr, PeerClient};
pub use filter::filter_active;
pub use registry::{Device, DeviceRegistry};

pub(crate) const SERVICE_TYPE: &str = "_lanshare._tcp.local.";
pub(crate) const PROP_DEVICE_ID: &str = "device_id";

/// Registry sweep cadence. mdns-sd keeps re-resolving services between
/// sweeps, so each sweep observes refreshed `last_seen` values.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(5);

/// Silence beyond this evicts a device. Six sweep intervals, so one or two
/// missed refreshes do not flap a live peer offline.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for one peer's session fetch during federation.
pub const PEER_FETCH_TIMEOUT: Duration = Duration::from_secs(2);
