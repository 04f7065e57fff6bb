//! Liveness filter: drop sessions whose host is offline.
//!
//! Filtering happens at read time rather than by deleting stale records, so
//! a host that reappears makes its sessions reappear with no reconciliation.

use std::collections::HashSet;

use share_store::Session;

/// Keep exactly the sessions whose host is `self_id` or currently live.
/// Input order is preserved.
pub fn filter_active(
    sessions: Vec<Session>,
    live: &HashSet<String>,
    self_id: &str,
) -> Vec<Session> {
    sessions
        .into_iter()
        .filter(|s| s.host_id == self_id || live.contains(&s.host_id))
        .collect()
}
