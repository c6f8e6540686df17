//! Verification and application of signed expiry updates.
//!
//! Every swarm member answers an expire request on its own, signing what it
//! did. A result is trusted only after its signature checks out against the
//! node's ed25519 key; until then nothing in the local ledger moves.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::Signature;
use tracing::{debug, info, warn};

use swarmlink_shared::error::SwarmError;
use swarmlink_shared::identity::verify_signature;
use swarmlink_shared::protocol::{ExpireMessageResultItem, ExpireMessagesResultsContent, RetrievedMessage};
use swarmlink_shared::types::SwarmPubkey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Signature verified; `updated` hashes now carry `expiry`.
    Applied {
        expiry: u64,
        updated: Vec<String>,
        unchanged: Vec<String>,
    },
    /// The node could not resolve the target swarm. Reported, not retried.
    Failed,
}

/// Per-node tally of [`ExpiryCoordinator::apply_swarm_results`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmApplySummary {
    pub applied: Vec<String>,
    pub rejected: Vec<String>,
    pub failed: Vec<String>,
}

/// Bytes a node signs for an expire result:
/// `pubkey_hex || expiry || requested... || updated... || (hash || expiry)...`
/// with every list ascii-sorted.
pub fn canonical_bytes(
    target: &SwarmPubkey,
    requested: &[String],
    result: &ExpireMessageResultItem,
) -> Vec<u8> {
    let mut requested: Vec<&str> = requested.iter().map(String::as_str).collect();
    requested.sort_unstable();
    let mut updated: Vec<&str> = result.updated.iter().map(String::as_str).collect();
    updated.sort_unstable();

    let mut out = target.to_hex().into_bytes();
    out.extend_from_slice(result.expiry.to_string().as_bytes());
    for h in requested.into_iter().chain(updated) {
        out.extend_from_slice(h.as_bytes());
    }
    // BTreeMap iterates in key order
    for (hash, expiry) in result.unchanged.iter().flatten() {
        out.extend_from_slice(hash.as_bytes());
        out.extend_from_slice(expiry.to_string().as_bytes());
    }
    out
}

/// Check a node's signature over its expire result.
pub fn verify_expiry_result(
    node_ed25519: &[u8; 32],
    target: &SwarmPubkey,
    requested: &[String],
    result: &ExpireMessageResultItem,
) -> Result<(), SwarmError> {
    let raw = STANDARD
        .decode(result.signature.trim())
        .map_err(|_| SwarmError::InvalidSignature)?;
    let signature = Signature::from_slice(&raw).map_err(|_| SwarmError::InvalidSignature)?;
    let message = canonical_bytes(target, requested, result);
    verify_signature(node_ed25519, &message, &signature).map_err(|_| SwarmError::InvalidSignature)
}

/// Local expiry ledger, `hash -> expiry_ms`.
#[derive(Debug, Clone, Default)]
pub struct ExpiryCoordinator {
    ledger: HashMap<String, u64>,
}

impl ExpiryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the expiries the swarm reported when the messages were
    /// retrieved.
    pub fn seed<'a>(&mut self, messages: impl IntoIterator<Item = &'a RetrievedMessage>) {
        for m in messages {
            self.ledger.insert(m.hash.clone(), m.expiration);
        }
    }

    pub fn expiry_of(&self, hash: &str) -> Option<u64> {
        self.ledger.get(hash).copied()
    }

    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }

    /// Forget hashes whose expiry is at or before `now_ms`.
    pub fn prune_expired(&mut self, now_ms: u64) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, expiry| *expiry > now_ms);
        let pruned = before - self.ledger.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.ledger.len(), "Pruned expired ledger entries");
        }
        pruned
    }

    /// Verify one node's result and apply it. An invalid signature leaves the
    /// ledger untouched.
    pub fn apply_expiry_result(
        &mut self,
        node_ed25519: &[u8; 32],
        target: &SwarmPubkey,
        requested: &[String],
        result: &ExpireMessageResultItem,
    ) -> Result<ApplyOutcome, SwarmError> {
        if result.failed == Some(true) {
            info!(
                node = %hex::encode(&node_ed25519[..4]),
                swarm = %target.short(),
                "Node could not resolve expire target"
            );
            return Ok(ApplyOutcome::Failed);
        }

        verify_expiry_result(node_ed25519, target, requested, result)?;

        let mut updated = Vec::new();
        for hash in &result.updated {
            if !requested.contains(hash) {
                debug!(hash = %hash, "Ignoring expiry update for unrequested hash");
                continue;
            }
            self.ledger.insert(hash.clone(), result.expiry);
            updated.push(hash.clone());
        }

        let unchanged = result
            .unchanged
            .as_ref()
            .map(|m: &BTreeMap<String, u64>| m.keys().cloned().collect())
            .unwrap_or_default();

        Ok(ApplyOutcome::Applied {
            expiry: result.expiry,
            updated,
            unchanged,
        })
    }

    /// Apply every node's answer independently; bad ones are dropped.
    pub fn apply_swarm_results(
        &mut self,
        target: &SwarmPubkey,
        requested: &[String],
        results: &ExpireMessagesResultsContent,
    ) -> SwarmApplySummary {
        let mut summary = SwarmApplySummary::default();

        for (node_hex, item) in results {
            let Some(key) = hex::decode(node_hex)
                .ok()
                .and_then(|b| <[u8; 32]>::try_from(b).ok())
            else {
                warn!(node = %node_hex, "Dropping expire result with malformed node key");
                summary.rejected.push(node_hex.clone());
                continue;
            };

            match self.apply_expiry_result(&key, target, requested, item) {
                Ok(ApplyOutcome::Applied { .. }) => summary.applied.push(node_hex.clone()),
                Ok(ApplyOutcome::Failed) => summary.failed.push(node_hex.clone()),
                Err(e) => {
                    warn!(node = %node_hex, error = %e, "Dropping expire result");
                    summary.rejected.push(node_hex.clone());
                }
            }
        }
        summary
    }
}
