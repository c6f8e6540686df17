//! Reconciliation of paginated retrieve results.
//!
//! Pages for one namespace are folded into a [`RetrieveAccumulator`]. A hash
//! is accepted at most once per namespace, whatever page it shows up on, and
//! the pagination cursor follows the last hash-bearing item of each page,
//! malformed or not.
//!
//! Hashes are remembered until their message expires. Pruning records the
//! cut-off, and items expiring at or before it are dropped on arrival.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use swarmlink_shared::protocol::{RetrieveMessageItem, RetrieveRequestResult, RetrievedMessage};
use swarmlink_shared::types::Namespace;

const STATUS_OK: u16 = 200;

#[derive(Debug, Clone, Default)]
struct NamespaceState {
    /// Hash to expiration.
    seen: HashMap<String, u64>,
    /// Ordered by `stored_at`, then hash.
    messages: Vec<RetrievedMessage>,
    last_hash: Option<String>,
    more: bool,
    failure: Option<u16>,
}

/// What a single page contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub namespace: Namespace,
    /// Messages not seen before, in page order.
    pub added: Vec<RetrievedMessage>,
    pub duplicates: usize,
    pub malformed: usize,
    /// Items that had already expired at the last prune.
    pub expired: usize,
    /// Whether another page should be requested for this namespace.
    pub more: bool,
}

/// Per-namespace view of everything retrieved during a polling cycle.
#[derive(Debug, Clone, Default)]
pub struct RetrieveAccumulator {
    namespaces: BTreeMap<Namespace, NamespaceState>,
    pruned_at: u64,
}

impl RetrieveAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one retrieve result into the accumulator.
    pub fn merge(&mut self, incoming: RetrieveRequestResult) -> MergeOutcome {
        let namespace = incoming.namespace;
        let pruned_at = self.pruned_at;
        let state = self.namespaces.entry(namespace).or_default();
        let mut outcome = MergeOutcome {
            namespace,
            ..Default::default()
        };

        if incoming.code != STATUS_OK {
            warn!(namespace = %namespace, code = incoming.code, "Retrieve failed for namespace");
            state.failure = Some(incoming.code);
            state.more = false;
            return outcome;
        }
        state.failure = None;

        for raw in incoming.messages.messages.unwrap_or_default() {
            if let Some(hash) = raw.get("hash").and_then(Value::as_str) {
                state.last_hash = Some(hash.to_owned());
            }

            let parsed = serde_json::from_value::<RetrieveMessageItem>(raw)
                .map_err(|e| e.to_string())
                .and_then(|item| {
                    RetrievedMessage::from_item(item, namespace).map_err(|e| e.to_string())
                });
            let message = match parsed {
                Ok(m) => m,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Skipping malformed retrieve item");
                    outcome.malformed += 1;
                    continue;
                }
            };

            if message.expiration <= pruned_at {
                outcome.expired += 1;
                continue;
            }
            if state.seen.contains_key(&message.hash) {
                outcome.duplicates += 1;
                continue;
            }
            state.seen.insert(message.hash.clone(), message.expiration);
            outcome.added.push(message);
        }

        if !outcome.added.is_empty() {
            state.messages.extend(outcome.added.iter().cloned());
            state
                .messages
                .sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.hash.cmp(&b.hash)));
        }

        state.more = incoming.messages.more;
        outcome.more = state.more;

        debug!(
            namespace = %namespace,
            added = outcome.added.len(),
            duplicates = outcome.duplicates,
            malformed = outcome.malformed,
            expired = outcome.expired,
            more = outcome.more,
            "Merged retrieve page"
        );
        outcome
    }

    /// Messages of `namespace`, ordered by server storage time.
    pub fn messages(&self, namespace: Namespace) -> &[RetrievedMessage] {
        self.namespaces
            .get(&namespace)
            .map(|s| s.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.namespaces.keys().copied()
    }

    /// Pagination cursor for the next request on `namespace`.
    pub fn last_hash(&self, namespace: Namespace) -> Option<&str> {
        self.namespaces.get(&namespace)?.last_hash.as_deref()
    }

    pub fn has_more(&self, namespace: Namespace) -> bool {
        self.namespaces.get(&namespace).is_some_and(|s| s.more)
    }

    /// Status code of the last failed page, cleared by the next good one.
    pub fn failure(&self, namespace: Namespace) -> Option<u16> {
        self.namespaces.get(&namespace)?.failure
    }

    pub fn has_seen(&self, namespace: Namespace, hash: &str) -> bool {
        self.namespaces
            .get(&namespace)
            .is_some_and(|s| s.seen.contains_key(hash))
    }

    /// Number of hashes remembered for `namespace`.
    pub fn seen_len(&self, namespace: Namespace) -> usize {
        self.namespaces.get(&namespace).map_or(0, |s| s.seen.len())
    }

    /// Drop messages and remembered hashes whose expiration is at or before
    /// `now_ms`. Returns how many messages went.
    pub fn prune_expired(&mut self, now_ms: u64) -> usize {
        self.pruned_at = self.pruned_at.max(now_ms);
        let mut pruned = 0;
        for (namespace, state) in self.namespaces.iter_mut() {
            let before = state.messages.len();
            state.messages.retain(|m| m.expiration > now_ms);
            let before_seen = state.seen.len();
            state.seen.retain(|_, expiration| *expiration > now_ms);

            let dropped = before - state.messages.len();
            let forgotten = before_seen - state.seen.len();
            if dropped > 0 || forgotten > 0 {
                debug!(namespace = %namespace, dropped, forgotten, "Pruned expired messages");
            }
            pruned += dropped;
        }
        pruned
    }

    /// Release retained message bodies, keeping hashes and cursors.
    pub fn clear_messages(&mut self) {
        for state in self.namespaces.values_mut() {
            state.messages.clear();
        }
    }
}

/// Functional form of [`RetrieveAccumulator::merge`].
pub fn merge_retrieve(
    mut existing: RetrieveAccumulator,
    incoming: RetrieveRequestResult,
) -> RetrieveAccumulator {
    existing.merge(incoming);
    existing
}
