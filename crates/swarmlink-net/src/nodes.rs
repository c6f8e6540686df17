//! Service node directory.
//!
//! Known storage nodes live in an arena addressed by stable [`NodeHandle`]s.
//! Reputation, blacklisting and swarm membership are mutated only through
//! [`NodeDirectory`], whose single lock is shared by every swarm session that
//! references the same relay.
//!
//! A blacklist entry lasts for the directory's cooldown, or until a
//! membership refresh lists the node again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use swarmlink_shared::constants::{DEFAULT_NODE_BLACKLIST_COOLDOWN_SECS, DEFAULT_NODE_FAILURE_THRESHOLD};
use swarmlink_shared::types::SwarmPubkey;

const MIN_REPUTATION: i64 = -100;
const MAX_REPUTATION: i64 = 100;

/// One storage/relay node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceNode {
    /// `host:port` of the node's HTTPS storage endpoint.
    pub address: String,
    pub pubkey_ed25519: [u8; 32],
    /// Key the onion layer addressed to this node is encrypted for.
    pub pubkey_x25519: [u8; 32],
}

impl ServiceNode {
    pub fn ed25519_hex(&self) -> String {
        hex::encode(self.pubkey_ed25519)
    }

    pub fn short(&self) -> String {
        self.ed25519_hex()[..8].to_string()
    }
}

/// Stable index into the directory arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Directory bookkeeping for one node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node: ServiceNode,
    pub reputation: i64,
    pub consecutive_failures: u32,
    /// Set when the node was blacklisted; the ban ends `cooldown` later.
    pub banned_at: Option<Instant>,
    /// Still listed by the latest membership refresh.
    pub active: bool,
}

impl NodeRecord {
    pub fn is_blacklisted(&self, cooldown: Duration) -> bool {
        self.banned_at.is_some_and(|at| at.elapsed() < cooldown)
    }

    fn is_viable(&self, cooldown: Duration) -> bool {
        self.active && !self.is_blacklisted(cooldown)
    }

    fn unban(&mut self) {
        self.banned_at = None;
        self.consecutive_failures = 0;
    }
}

#[derive(Debug, Default)]
struct DirectoryInner {
    records: Vec<NodeRecord>,
    by_key: HashMap<[u8; 32], NodeHandle>,
    swarms: HashMap<SwarmPubkey, Vec<NodeHandle>>,
}

impl DirectoryInner {
    fn upsert(&mut self, node: ServiceNode) -> NodeHandle {
        if let Some(&handle) = self.by_key.get(&node.pubkey_ed25519) {
            let record = &mut self.records[handle.0];
            record.node = node;
            record.active = true;
            return handle;
        }

        let handle = NodeHandle(self.records.len());
        self.by_key.insert(node.pubkey_ed25519, handle);
        self.records.push(NodeRecord {
            node,
            reputation: 0,
            consecutive_failures: 0,
            banned_at: None,
            active: true,
        });
        handle
    }

    fn viable(
        &self,
        handles: impl Iterator<Item = NodeHandle>,
        excluded: &HashSet<NodeHandle>,
        cooldown: Duration,
    ) -> Vec<(NodeHandle, ServiceNode)> {
        handles
            .filter(|h| !excluded.contains(h))
            .filter_map(|h| {
                let record = self.records.get(h.0)?;
                record.is_viable(cooldown).then(|| (h, record.node.clone()))
            })
            .collect()
    }
}

/// Shared, synchronized view of swarm membership and node reputation.
#[derive(Debug, Clone)]
pub struct NodeDirectory {
    inner: Arc<Mutex<DirectoryInner>>,
    failure_threshold: u32,
    blacklist_cooldown: Duration,
}

impl NodeDirectory {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DirectoryInner::default())),
            failure_threshold: failure_threshold.max(1),
            blacklist_cooldown: Duration::from_secs(DEFAULT_NODE_BLACKLIST_COOLDOWN_SECS),
        }
    }

    /// How long a blacklisted node stays out of path selection.
    pub fn with_blacklist_cooldown(mut self, cooldown: Duration) -> Self {
        self.blacklist_cooldown = cooldown;
        self
    }

    /// Add a node or refresh its addressing, keeping its reputation.
    pub async fn insert(&self, node: ServiceNode) -> NodeHandle {
        self.inner.lock().await.upsert(node)
    }

    /// Replace the known membership. Nodes missing from `nodes` stay in the
    /// arena (handles remain valid) but are no longer selected. Listed nodes
    /// start over with a clean failure count.
    pub async fn refresh_membership(&self, nodes: Vec<ServiceNode>) -> Vec<NodeHandle> {
        let mut inner = self.inner.lock().await;
        for record in inner.records.iter_mut() {
            record.active = false;
        }
        let handles: Vec<NodeHandle> = nodes.into_iter().map(|n| inner.upsert(n)).collect();

        let mut reinstated = 0;
        for handle in &handles {
            let record = &mut inner.records[handle.0];
            if record.banned_at.is_some() {
                reinstated += 1;
            }
            record.unban();
        }
        info!(count = handles.len(), reinstated, "Refreshed service node membership");
        handles
    }

    /// Record which nodes hold the data of `pubkey`.
    pub async fn set_swarm(&self, pubkey: SwarmPubkey, nodes: Vec<ServiceNode>) {
        let mut inner = self.inner.lock().await;
        let handles: Vec<NodeHandle> = nodes.into_iter().map(|n| inner.upsert(n)).collect();
        debug!(swarm = %pubkey.short(), size = handles.len(), "Updated swarm membership");
        inner.swarms.insert(pubkey, handles);
    }

    pub async fn has_swarm(&self, pubkey: &SwarmPubkey) -> bool {
        self.inner.lock().await.swarms.contains_key(pubkey)
    }

    pub async fn get(&self, handle: NodeHandle) -> Option<ServiceNode> {
        let inner = self.inner.lock().await;
        inner.records.get(handle.0).map(|r| r.node.clone())
    }

    pub async fn record(&self, handle: NodeHandle) -> Option<NodeRecord> {
        let inner = self.inner.lock().await;
        inner.records.get(handle.0).cloned()
    }

    pub async fn handle_of(&self, pubkey_ed25519: &[u8; 32]) -> Option<NodeHandle> {
        self.inner.lock().await.by_key.get(pubkey_ed25519).copied()
    }

    /// Nodes usable as relays: active, not blacklisted, not excluded.
    pub async fn viable_nodes(&self, excluded: &HashSet<NodeHandle>) -> Vec<(NodeHandle, ServiceNode)> {
        let inner = self.inner.lock().await;
        inner.viable((0..inner.records.len()).map(NodeHandle), excluded, self.blacklist_cooldown)
    }

    /// Viable members of `pubkey`'s swarm. Falls back to every viable node
    /// when no swarm has been recorded for the pubkey.
    pub async fn swarm_nodes(
        &self,
        pubkey: &SwarmPubkey,
        excluded: &HashSet<NodeHandle>,
    ) -> Vec<(NodeHandle, ServiceNode)> {
        let inner = self.inner.lock().await;
        match inner.swarms.get(pubkey) {
            Some(handles) => inner.viable(handles.iter().copied(), excluded, self.blacklist_cooldown),
            None => inner.viable(
                (0..inner.records.len()).map(NodeHandle),
                excluded,
                self.blacklist_cooldown,
            ),
        }
    }

    pub async fn is_viable(&self, handle: NodeHandle) -> bool {
        let inner = self.inner.lock().await;
        inner
            .records
            .get(handle.0)
            .is_some_and(|r| r.is_viable(self.blacklist_cooldown))
    }

    /// Penalise a node. Returns `true` if this failure blacklisted it.
    ///
    /// A node whose ban has run out keeps its failure count, so one more
    /// failure puts it straight back on the blacklist.
    pub async fn record_failure(&self, handle: NodeHandle) -> bool {
        let mut inner = self.inner.lock().await;
        let threshold = self.failure_threshold;
        let cooldown = self.blacklist_cooldown;
        let Some(record) = inner.records.get_mut(handle.0) else {
            return false;
        };

        record.consecutive_failures += 1;
        record.reputation = (record.reputation - 10).max(MIN_REPUTATION);

        if !record.is_blacklisted(cooldown) && record.consecutive_failures >= threshold {
            record.banned_at = Some(Instant::now());
            warn!(
                node = %record.node.short(),
                failures = record.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "Blacklisting service node"
            );
            return true;
        }

        debug!(
            node = %record.node.short(),
            failures = record.consecutive_failures,
            reputation = record.reputation,
            "Recorded node failure"
        );
        false
    }

    pub async fn record_success(&self, handle: NodeHandle) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.records.get_mut(handle.0) {
            record.unban();
            record.reputation = (record.reputation + 1).min(MAX_REPUTATION);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for NodeDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_FAILURE_THRESHOLD)
    }
}
