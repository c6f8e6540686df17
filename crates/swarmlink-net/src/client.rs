//! Onion-routed batch dispatch with retry, plus the membership queries that
//! keep the node directory current.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{debug, info, warn};

use swarmlink_shared::error::{SwarmError, TransportError};
use swarmlink_shared::protocol::{BatchResponse, SubResult};
use swarmlink_shared::types::SwarmPubkey;

use crate::discovery::{parse_swarm_listing, service_nodes_from_value};
use crate::nodes::{NodeDirectory, NodeHandle, ServiceNode};
use crate::onion::build_onion;
use crate::path::{PathBuilder, PathHop, SwarmPath};
use crate::request::{BatchRequest, SubRequest};
use crate::transport::Transport;

/// Answers to one batch, positionally matching its sub-requests.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Node that executed the batch.
    pub destination: ServiceNode,
    pub results: Vec<SubResult>,
}

pub struct SwarmClient {
    paths: Arc<PathBuilder>,
    transport: Arc<dyn Transport>,
    max_attempts: usize,
}

impl SwarmClient {
    pub fn new(paths: Arc<PathBuilder>, transport: Arc<dyn Transport>, max_attempts: usize) -> Self {
        Self {
            paths,
            transport,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn directory(&self) -> &NodeDirectory {
        self.paths.directory()
    }

    pub fn paths(&self) -> &PathBuilder {
        &self.paths
    }

    /// Fetch the active service node list through the swarm of `via` and make
    /// it the directory's membership. An empty listing leaves the directory
    /// untouched.
    pub async fn refresh_nodes(&self, via: &SwarmPubkey) -> Result<usize, SwarmError> {
        let sub = self.query(SubRequest::get_service_nodes(via.clone())).await?;
        let nodes = service_nodes_from_value(sub.body)?;
        if nodes.is_empty() {
            return Err(SwarmError::Protocol("empty service node list".into()));
        }
        let handles = self.directory().refresh_membership(nodes).await;
        Ok(handles.len())
    }

    /// Ask the network which nodes hold `target` and record them.
    pub async fn lookup_swarm(&self, target: &SwarmPubkey) -> Result<usize, SwarmError> {
        let sub = self.query(SubRequest::get_swarm(target.clone())).await?;
        self.record_swarm(target, &sub.body).await
    }

    /// Record the swarm members listed in a `get_swarm` answer or a 421
    /// wrong-swarm reply.
    pub async fn record_swarm(&self, target: &SwarmPubkey, body: &Value) -> Result<usize, SwarmError> {
        let members = parse_swarm_listing(body)?;
        if members.is_empty() {
            return Err(SwarmError::Protocol(format!(
                "no reachable members listed for {}",
                target.short()
            )));
        }
        let count = members.len();
        self.directory().set_swarm(target.clone(), members).await;
        Ok(count)
    }

    async fn query(&self, request: SubRequest) -> Result<SubResult, SwarmError> {
        let method = request.method();
        let batch = BatchRequest::new(request.target().clone(), vec![request]);
        let sub = self
            .send(&batch)
            .await?
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SwarmError::Protocol(format!("empty {method} response")))?;
        if !sub.is_success() {
            return Err(SwarmError::Protocol(format!("{method} rejected with {}", sub.code)));
        }
        Ok(sub)
    }

    /// Pick a node of the target swarm and dispatch the batch to it. When the
    /// destination itself turns out unreachable another member is tried.
    pub async fn send(&self, batch: &BatchRequest) -> Result<BatchResult, SwarmError> {
        let mut skipped: HashSet<NodeHandle> = HashSet::new();

        for _ in 0..self.max_attempts {
            let candidates = self.directory().swarm_nodes(&batch.target, &skipped).await;
            let Some((handle, node)) = candidates.choose(&mut rand::thread_rng()).cloned() else {
                return Err(SwarmError::NoViableNodes {
                    required: 1,
                    available: 0,
                });
            };

            let path = self.paths.path_for(handle, &skipped).await?;
            let destination = PathHop { handle, node };

            match self.dispatch(batch, &destination, path).await {
                Err(SwarmError::Transport(TransportError::HopUnreachable(key)))
                    if key == destination.node.pubkey_ed25519 =>
                {
                    info!(
                        swarm = %batch.target.short(),
                        destination = %destination.node.short(),
                        "Destination unreachable, choosing another swarm member"
                    );
                    skipped.insert(handle);
                }
                other => return other,
            }
        }

        Err(SwarmError::SwarmUnreachable {
            attempts: self.max_attempts,
        })
    }

    /// Send `batch` to `destination` through `path`, rebuilding the path
    /// around failing hops up to the attempt bound.
    pub async fn dispatch(
        &self,
        batch: &BatchRequest,
        destination: &PathHop,
        path: SwarmPath,
    ) -> Result<BatchResult, SwarmError> {
        let body = batch.to_json()?;
        let mut path = path;
        let mut excluded: HashSet<NodeHandle> = HashSet::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                path = self.paths.path_for(destination.handle, &excluded).await?;
            }

            let onion = build_onion(&path, &destination.node, &body)?;
            let guard = onion.guard.clone();

            let err = match self.transport.send_onion(&guard.node, onion.payload.clone()).await {
                Ok(raw) => {
                    let plaintext = onion.open_response(&raw)?;
                    let response: BatchResponse = serde_json::from_slice(&plaintext)?;
                    if response.results.len() != batch.len() {
                        return Err(SwarmError::Protocol(format!(
                            "sent {} sub-requests, got {} results",
                            batch.len(),
                            response.results.len()
                        )));
                    }

                    for handle in path.handles() {
                        self.directory().record_success(handle).await;
                    }
                    self.directory().record_success(destination.handle).await;

                    debug!(
                        destination = %destination.node.short(),
                        results = response.results.len(),
                        attempt,
                        "Batch dispatched"
                    );
                    return Ok(BatchResult {
                        destination: destination.node.clone(),
                        results: response.results,
                    });
                }
                Err(e) => e,
            };

            let culprit = match &err {
                TransportError::HopUnreachable(key) => self.directory().handle_of(key).await,
                TransportError::Network(_) | TransportError::Status(_) => Some(guard.handle),
            };

            warn!(
                destination = %destination.node.short(),
                attempt,
                error = %err,
                "Onion dispatch failed"
            );

            match culprit {
                Some(handle) if handle == destination.handle => {
                    self.directory().record_failure(handle).await;
                    self.paths.invalidate(destination.handle).await;
                    return Err(err.into());
                }
                Some(handle) => {
                    self.directory().record_failure(handle).await;
                    self.paths.invalidate_node(handle).await;
                    excluded.insert(handle);
                }
                None => self.paths.invalidate(destination.handle).await,
            }
        }

        Err(SwarmError::SwarmUnreachable {
            attempts: self.max_attempts,
        })
    }
}
