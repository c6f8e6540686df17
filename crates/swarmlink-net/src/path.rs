//! Onion path selection and caching.
//!
//! A path is an ordered chain of relays; the first hop is the guard the
//! client talks to directly. Paths are cached per destination node and
//! rebuilt once they age out or one of their hops is implicated in a
//! failure.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info};

use swarmlink_shared::error::SwarmError;

use crate::nodes::{NodeDirectory, NodeHandle, ServiceNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHop {
    pub handle: NodeHandle,
    pub node: ServiceNode,
}

#[derive(Debug, Clone)]
pub struct SwarmPath {
    hops: Vec<PathHop>,
    built_at: Instant,
}

impl SwarmPath {
    pub fn new(hops: Vec<PathHop>) -> Self {
        Self {
            hops,
            built_at: Instant::now(),
        }
    }

    /// First hop, contacted directly.
    pub fn guard(&self) -> Option<&PathHop> {
        self.hops.first()
    }

    pub fn hops(&self) -> &[PathHop] {
        &self.hops
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.hops.iter().map(|h| h.handle)
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.hops.iter().any(|h| h.handle == handle)
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.age() >= max_age
    }
}

pub struct PathBuilder {
    directory: NodeDirectory,
    depth: usize,
    max_age: Duration,
    cache: Mutex<HashMap<NodeHandle, SwarmPath>>,
}

impl PathBuilder {
    pub fn new(directory: NodeDirectory, depth: usize, max_age: Duration) -> Self {
        Self {
            directory,
            depth: depth.max(1),
            max_age,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    /// Pick `depth` random viable relays outside `excluded`.
    pub async fn build_path(&self, excluded: &HashSet<NodeHandle>) -> Result<SwarmPath, SwarmError> {
        let mut candidates = self.directory.viable_nodes(excluded).await;
        if candidates.len() < self.depth {
            return Err(SwarmError::NoViableNodes {
                required: self.depth,
                available: candidates.len(),
            });
        }

        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(self.depth);

        let hops: Vec<PathHop> = candidates
            .into_iter()
            .map(|(handle, node)| PathHop { handle, node })
            .collect();

        debug!(
            guard = %hops[0].node.short(),
            depth = hops.len(),
            "Built onion path"
        );

        Ok(SwarmPath::new(hops))
    }

    /// Cached path towards `destination`, rebuilt when stale. The destination
    /// itself never appears among the hops.
    pub async fn path_for(
        &self,
        destination: NodeHandle,
        excluded: &HashSet<NodeHandle>,
    ) -> Result<SwarmPath, SwarmError> {
        let mut cache = self.cache.lock().await;

        if let Some(path) = cache.get(&destination) {
            if self.is_usable(path, excluded).await {
                return Ok(path.clone());
            }
            debug!(destination = destination.index(), "Cached path is stale, rebuilding");
        }

        let mut excluded = excluded.clone();
        excluded.insert(destination);
        let path = self.build_path(&excluded).await?;
        cache.insert(destination, path.clone());
        Ok(path)
    }

    async fn is_usable(&self, path: &SwarmPath, excluded: &HashSet<NodeHandle>) -> bool {
        if path.is_expired(self.max_age) {
            return false;
        }
        for handle in path.handles() {
            if excluded.contains(&handle) || !self.directory.is_viable(handle).await {
                return false;
            }
        }
        true
    }

    /// Forget the cached path towards `destination`.
    pub async fn invalidate(&self, destination: NodeHandle) {
        self.cache.lock().await.remove(&destination);
    }

    /// Forget every cached path running through `node`. Returns how many
    /// paths were dropped.
    pub async fn invalidate_node(&self, node: NodeHandle) -> usize {
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|destination, path| *destination != node && !path.contains(node));
        let dropped = before - cache.len();
        if dropped > 0 {
            info!(node = node.index(), dropped, "Invalidated paths through failed node");
        }
        dropped
    }
}
