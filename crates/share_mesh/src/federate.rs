//! Session federation: fan out to live peers, merge with local sessions.
//!
//! Every peer is asked concurrently with a per-peer budget; a peer that
//! errors or times out contributes nothing to this call. Freshness matters
//! more than completeness, so there are no retries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::debug;

use share_store::Session;

use crate::registry::Device;

/// How the federator reaches a peer's session listing. Implementations
/// handle the wire; the federator handles fan-out, timeouts and merging.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch the sessions a peer hosts locally.
    async fn fetch_sessions(&self, address: &str, port: u16) -> anyhow::Result<Vec<Session>>;
}

/// Where to reach one peer during a federation call.
#[derive(Debug, Clone)]
pub struct PeerAddr {
    pub device_id: String,
    pub address: String,
    pub port: u16,
}

impl From<&Device> for PeerAddr {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.device_id.clone(),
            address: device.address.clone(),
            port: device.port,
        }
    }
}

/// Merge `local` with every reachable peer's sessions.
///
/// Fan-out is concurrent, so the call returns in O(per-peer timeout)
/// regardless of peer count. Duplicate session ids collapse to the first
/// occurrence: local sessions are merged first, then peers in the order
/// given (the registry's snapshot order), so the local copy always wins.
pub async fn federate_sessions(
    local: Vec<Session>,
    peers: &[PeerAddr],
    client: &Arc<dyn PeerClient>,
    per_peer_timeout: Duration,
) -> Vec<Session> {
    if peers.is_empty() {
        return local;
    }

    let mut tasks = JoinSet::new();
    for (idx, peer) in peers.iter().cloned().enumerate() {
        let client = Arc::clone(client);
        tasks.spawn(async move {
            let fetched = tokio::time::timeout(
                per_peer_timeout,
                client.fetch_sessions(&peer.address, peer.port),
            )
            .await;

            let sessions = match fetched {
                Ok(Ok(sessions)) => sessions,
                Ok(Err(e)) => {
                    debug!("peer {} session fetch failed: {e}", peer.device_id);
                    Vec::new()
                }
                Err(_) => {
                    debug!(
                        "peer {} session fetch timed out after {:?}",
                        peer.device_id, per_peer_timeout
                    );
                    Vec::new()
                }
            };
            (idx, sessions)
        });
    }

    // Settle every peer (success or timeout), then merge in peer order so
    // the result is deterministic for a given registry snapshot.
    let mut per_peer: Vec<Vec<Session>> = vec![Vec::new(); peers.len()];
    while let Some(joined) = tasks.join_next().await {
        if let Ok((idx, sessions)) = joined {
            per_peer[idx] = sessions;
        }
    }

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for session in local.into_iter().chain(per_peer.into_iter().flatten()) {
        if seen.insert(session.session_id.clone()) {
            merged.push(session);
        }
    }
    merged
}

/// Fetches `GET /sessions/local` from peers over HTTP.
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_sessions(&self, address: &str, port: u16) -> anyhow::Result<Vec<Session>> {
        let url = format!("http://{}/sessions/local", authority(address, port));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// IPv6 literals need brackets in a URL authority.
fn authority(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

/// Test peer: canned responses keyed by address, optional artificial latency.
pub struct MockPeerClient {
    responses: std::sync::Mutex<HashMap<String, Vec<Session>>>,
    latency: Option<Duration>,
    fetched: std::sync::Mutex<Vec<String>>,
}

impl MockPeerClient {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(HashMap::new()),
            latency: None,
            fetched: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    pub fn set_sessions(&self, address: &str, sessions: Vec<Session>) {
        self.responses
            .lock()
            .unwrap()
            .insert(address.to_string(), sessions);
    }

    pub fn take_fetched(&self) -> Vec<String> {
        std::mem::take(&mut *self.fetched.lock().unwrap())
    }
}

impl Default for MockPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn fetch_sessions(&self, address: &str, _port: u16) -> anyhow::Result<Vec<Session>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.fetched.lock().unwrap().push(address.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no canned sessions for {address}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn session(id: &str, name: &str, host: &str) -> Session {
        Session {
            session_id: id.into(),
            name: name.into(),
            host_id: host.into(),
        }
    }

    fn peer(device_id: &str, address: &str) -> PeerAddr {
        PeerAddr {
            device_id: device_id.into(),
            address: address.into(),
            port: 8080,
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn empty_peer_set_returns_local_unchanged() {
        let client: Arc<dyn PeerClient> = Arc::new(MockPeerClient::new());
        let local = vec![session("s1", "standup", "device-a")];

        let merged = federate_sessions(local.clone(), &[], &client, TIMEOUT).await;
        assert_eq!(merged, local);
    }

    #[tokio::test]
    async fn merges_peer_sessions_after_local() {
        let mock = MockPeerClient::new();
        mock.set_sessions("10.0.0.2", vec![session("s2", "retro", "device-b")]);
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let local = vec![session("s1", "standup", "device-a")];
        let merged =
            federate_sessions(local, &[peer("device-b", "10.0.0.2")], &client, TIMEOUT).await;

        let ids: Vec<&str> = merged.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn local_copy_wins_on_duplicate_id() {
        let mock = MockPeerClient::new();
        // Peer reports a stale copy of a session this device hosts.
        mock.set_sessions("10.0.0.2", vec![session("s1", "stale-name", "device-b")]);
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let local = vec![session("s1", "standup", "device-a")];
        let merged =
            federate_sessions(local, &[peer("device-b", "10.0.0.2")], &client, TIMEOUT).await;

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], session("s1", "standup", "device-a"));
    }

    #[tokio::test]
    async fn duplicate_across_peers_keeps_first_peer_copy() {
        let mock = MockPeerClient::new();
        mock.set_sessions("10.0.0.2", vec![session("s9", "from-b", "device-d")]);
        mock.set_sessions("10.0.0.3", vec![session("s9", "from-c", "device-d")]);
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let peers = [peer("device-b", "10.0.0.2"), peer("device-c", "10.0.0.3")];
        let merged = federate_sessions(Vec::new(), &peers, &client, TIMEOUT).await;

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "from-b");
    }

    #[tokio::test]
    async fn failing_peer_contributes_nothing() {
        let mock = MockPeerClient::new();
        mock.set_sessions("10.0.0.2", vec![session("s2", "retro", "device-b")]);
        // No canned response for device-c: the fetch errors.
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let local = vec![session("s1", "standup", "device-a")];
        let peers = [peer("device-b", "10.0.0.2"), peer("device-c", "10.0.0.3")];
        let merged = federate_sessions(local, &peers, &client, TIMEOUT).await;

        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn slow_peers_time_out_without_blocking_the_call() {
        // Peers stall far past the budget; the call must return with the
        // local list shortly after the per-peer timeout, not after the stall.
        let mock = MockPeerClient::with_latency(Duration::from_millis(400));
        mock.set_sessions("10.0.0.2", vec![session("s2", "retro", "device-b")]);
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let local = vec![session("s1", "standup", "device-a")];
        let peers = [peer("device-b", "10.0.0.2")];

        let start = Instant::now();
        let merged =
            federate_sessions(local.clone(), &peers, &client, Duration::from_millis(100)).await;
        let elapsed = start.elapsed();

        assert_eq!(merged, local);
        assert!(elapsed < Duration::from_millis(350), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn fan_out_is_concurrent_across_many_peers() {
        // Six peers each answering near the 200ms mark: a sequential fan-out
        // would need ~1.2s, a concurrent one stays close to a single fetch.
        let mock = MockPeerClient::with_latency(Duration::from_millis(200));
        let peers: Vec<PeerAddr> = (0..6)
            .map(|i| {
                let address = format!("10.0.0.{}", i + 2);
                mock.set_sessions(
                    &address,
                    vec![session(&format!("s{i}"), "shared", &format!("device-{i}"))],
                );
                PeerAddr {
                    device_id: format!("device-{i}"),
                    address,
                    port: 8080,
                }
            })
            .collect();
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let start = Instant::now();
        let merged =
            federate_sessions(Vec::new(), &peers, &client, Duration::from_secs(2)).await;
        let elapsed = start.elapsed();

        assert_eq!(merged.len(), 6);
        assert!(elapsed < Duration::from_millis(800), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn merge_order_follows_peer_order_not_completion_order() {
        let mock = MockPeerClient::new();
        mock.set_sessions("10.0.0.2", vec![session("s2", "retro", "device-b")]);
        mock.set_sessions("10.0.0.3", vec![session("s3", "planning", "device-c")]);
        let client: Arc<dyn PeerClient> = Arc::new(mock);

        let peers = [peer("device-b", "10.0.0.2"), peer("device-c", "10.0.0.3")];
        let local = vec![session("s1", "standup", "device-a")];
        let merged = federate_sessions(local, &peers, &client, TIMEOUT).await;

        let ids: Vec<&str> = merged.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn authority_brackets_ipv6() {
        assert_eq!(authority("192.168.1.5", 8080), "192.168.1.5:8080");
        assert_eq!(authority("fe80::1", 8080), "[fe80::1]:8080");
    }
}
