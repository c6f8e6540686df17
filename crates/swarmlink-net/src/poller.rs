//! Swarm polling task with tokio mpsc command/notification channels.
//!
//! The poller owns no network state of its own: it drives a shared
//! [`SwarmClient`] from a dedicated tokio task. Polls for one
//! (swarm, namespace) pair are serialized by an async lock that is held for
//! the whole pagination loop, while different swarms poll concurrently.
//! A watched swarm whose previous poll is still running skips the tick.
//!
//! The service node list is refreshed on its own interval and on demand.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use swarmlink_shared::acceptance::should_process_content_message;
use swarmlink_shared::envelope::{DecryptedContent, EnvelopeCodec};
use swarmlink_shared::error::SwarmError;
use swarmlink_shared::protocol::{
    ExpireResponseBody, OutgoingMessage, RetrieveMessagesResultsContent, RetrieveRequestResult,
    RetrievedMessage, StoreResponseBody,
};
use swarmlink_shared::types::{now_ms, Namespace, SwarmPubkey};

use crate::client::SwarmClient;
use crate::expiry::{ExpiryCoordinator, SwarmApplySummary};
use crate::request::{BatchRequest, ExpiryMode, Operation, RequestEncoder};
use crate::retrieve::RetrieveAccumulator;

/// Upper bound on `more` continuations within one poll.
const MAX_PAGES_PER_POLL: usize = 50;

/// Sub-request status of a node that does not hold the target swarm.
const STATUS_WRONG_SWARM: u16 = 421;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the poller task.
#[derive(Debug)]
pub enum PollerCommand {
    /// Poll the given namespaces of a swarm once.
    Poll {
        target: SwarmPubkey,
        namespaces: Vec<Namespace>,
    },
    /// Poll now and then on every tick of the poll interval.
    Watch {
        target: SwarmPubkey,
        namespaces: Vec<Namespace>,
    },
    /// Stop polling a swarm on the interval and forget its retrieve state.
    Unwatch(SwarmPubkey),
    /// Refresh the service node list now.
    RefreshNodes,
    /// Seal and store an outgoing message.
    Send(OutgoingMessage),
    /// Change the expiry of stored messages.
    Expire {
        target: SwarmPubkey,
        hashes: Vec<String>,
        expiry_ms: u64,
        mode: ExpiryMode,
    },
    /// Stop the poller. In-flight requests finish and are discarded.
    Shutdown,
}

/// Notifications sent *from* the poller task to the application.
#[derive(Debug, Clone)]
pub enum PollerNotification {
    /// Hashes of messages seen for the first time, ordered by storage time.
    /// Their content only surfaces through [`ContentAccepted`](Self::ContentAccepted).
    MessagesRetrieved {
        target: SwarmPubkey,
        namespace: Namespace,
        hashes: Vec<String>,
    },
    /// A decrypted message that passed the acceptance gate.
    ContentAccepted {
        target: SwarmPubkey,
        namespace: Namespace,
        content: DecryptedContent,
    },
    PollCompleted {
        target: SwarmPubkey,
        new_messages: usize,
    },
    PollFailed {
        target: SwarmPubkey,
        error: String,
    },
    MessageStored {
        identifier: String,
        hash: Option<String>,
    },
    SendFailed {
        identifier: String,
        error: String,
    },
    ExpiryUpdated {
        target: SwarmPubkey,
        summary: SwarmApplySummary,
    },
    ExpiryFailed {
        target: SwarmPubkey,
        error: String,
    },
    NodesRefreshed {
        count: usize,
    },
    NodeRefreshFailed {
        error: String,
    },
}

/// Collaborators the poller drives.
pub struct PollerContext {
    pub client: Arc<SwarmClient>,
    pub encoder: Arc<RequestEncoder>,
    pub codec: Arc<dyn EnvelopeCodec>,
    pub expiry: Arc<Mutex<ExpiryCoordinator>>,
    pub poll_interval: Duration,
    pub membership_refresh_interval: Duration,
}

type AccumulatorSlot = Arc<Mutex<RetrieveAccumulator>>;

#[derive(Clone)]
struct Worker {
    client: Arc<SwarmClient>,
    encoder: Arc<RequestEncoder>,
    codec: Arc<dyn EnvelopeCodec>,
    expiry: Arc<Mutex<ExpiryCoordinator>>,
    slots: Arc<Mutex<HashMap<(SwarmPubkey, Namespace), AccumulatorSlot>>>,
    notif_tx: mpsc::Sender<PollerNotification>,
}

impl Worker {
    async fn notify(&self, notification: PollerNotification) {
        let _ = self.notif_tx.send(notification).await;
    }

    async fn slot(&self, target: &SwarmPubkey, namespace: Namespace) -> AccumulatorSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry((target.clone(), namespace))
            .or_insert_with(|| Arc::new(Mutex::new(RetrieveAccumulator::new())))
            .clone()
    }

    /// Drop the retrieve state of every namespace of `target`.
    async fn forget(&self, target: &SwarmPubkey) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|(swarm, _), _| swarm != target);
        before - slots.len()
    }

    fn spawn_poll(&self, target: SwarmPubkey, namespaces: Vec<Namespace>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move { worker.run_poll(target, namespaces).await })
    }

    /// Look the swarm up first when no membership is known for it yet.
    fn spawn_watch(&self, target: SwarmPubkey, namespaces: Vec<Namespace>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            if !worker.client.directory().has_swarm(&target).await {
                match worker.client.lookup_swarm(&target).await {
                    Ok(size) => debug!(swarm = %target.short(), size, "Located swarm"),
                    Err(e) => warn!(swarm = %target.short(), error = %e, "Swarm lookup failed"),
                }
            }
            worker.run_poll(target, namespaces).await
        })
    }

    async fn run_poll(&self, target: SwarmPubkey, namespaces: Vec<Namespace>) {
        match self.poll(&target, namespaces).await {
            Ok(new_messages) => {
                self.notify(PollerNotification::PollCompleted { target, new_messages })
                    .await;
            }
            Err(e) => {
                warn!(swarm = %target.short(), error = %e, "Poll failed");
                self.notify(PollerNotification::PollFailed {
                    target,
                    error: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn refresh_nodes(&self) {
        let notification = match self.client.refresh_nodes(self.encoder.user()).await {
            Ok(count) => PollerNotification::NodesRefreshed { count },
            Err(e) => {
                warn!(error = %e, "Service node refresh failed");
                PollerNotification::NodeRefreshFailed {
                    error: e.to_string(),
                }
            }
        };
        self.notify(notification).await;
    }

    /// One polling cycle: page through every namespace until the swarm
    /// reports nothing more, then hand fresh messages to the codec and the
    /// acceptance gate.
    async fn poll(&self, target: &SwarmPubkey, mut namespaces: Vec<Namespace>) -> Result<usize, SwarmError> {
        // Fixed lock order across concurrent polls of the same swarm
        namespaces.sort();
        namespaces.dedup();

        let mut guards: BTreeMap<Namespace, OwnedMutexGuard<RetrieveAccumulator>> = BTreeMap::new();
        for ns in &namespaces {
            let slot = self.slot(target, *ns).await;
            guards.insert(*ns, slot.lock_owned().await);
        }

        let mut fresh: BTreeMap<Namespace, Vec<RetrievedMessage>> = BTreeMap::new();
        // Whatever was merged before a failure is already marked seen and
        // must still be delivered.
        let paged = self.page_through(target, namespaces, &mut guards, &mut fresh).await;

        let now = now_ms();
        for acc in guards.values_mut() {
            acc.prune_expired(now);
            acc.clear_messages();
        }
        drop(guards);

        let mut total = 0;
        for (namespace, mut messages) in fresh {
            if messages.is_empty() {
                continue;
            }
            messages.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.hash.cmp(&b.hash)));
            total += messages.len();

            self.expiry.lock().await.seed(&messages);
            info!(
                swarm = %target.short(),
                namespace = %namespace,
                count = messages.len(),
                "Retrieved new messages"
            );
            self.notify(PollerNotification::MessagesRetrieved {
                target: target.clone(),
                namespace,
                hashes: messages.iter().map(|m| m.hash.clone()).collect(),
            })
            .await;

            for message in &messages {
                self.deliver(target, namespace, message).await;
            }
        }
        self.expiry.lock().await.prune_expired(now);
        paged.map(|()| total)
    }

    /// Request pages for `pending` until no namespace reports `more`, folding
    /// each into its accumulator and collecting the newly seen messages.
    async fn page_through(
        &self,
        target: &SwarmPubkey,
        mut pending: Vec<Namespace>,
        guards: &mut BTreeMap<Namespace, OwnedMutexGuard<RetrieveAccumulator>>,
        fresh: &mut BTreeMap<Namespace, Vec<RetrievedMessage>>,
    ) -> Result<(), SwarmError> {
        let mut pages = 0;

        while !pending.is_empty() {
            if pages == MAX_PAGES_PER_POLL {
                warn!(swarm = %target.short(), pages, "Page limit reached, resuming next poll");
                break;
            }
            pages += 1;

            let mut requests = Vec::with_capacity(pending.len());
            for ns in &pending {
                let last_hash = guards
                    .get(ns)
                    .and_then(|acc| acc.last_hash(*ns))
                    .map(str::to_owned);
                requests.push(self.encoder.encode(Operation::Retrieve {
                    target: target.clone(),
                    namespace: *ns,
                    last_hash,
                })?);
            }

            let batch = BatchRequest::new(target.clone(), requests);
            let result = self.client.send(&batch).await?;

            let mut next = Vec::new();
            for (ns, sub) in pending.iter().zip(result.results) {
                if sub.code == STATUS_WRONG_SWARM {
                    match self.client.record_swarm(target, &sub.body).await {
                        Ok(size) => info!(swarm = %target.short(), size, "Swarm moved, membership updated"),
                        Err(e) => debug!(swarm = %target.short(), error = %e, "Wrong swarm without usable member list"),
                    }
                }
                let messages = if sub.code == 200 {
                    serde_json::from_value::<RetrieveMessagesResultsContent>(sub.body).unwrap_or_else(|e| {
                        warn!(namespace = %ns, error = %e, "Unreadable retrieve page");
                        RetrieveMessagesResultsContent::default()
                    })
                } else {
                    RetrieveMessagesResultsContent::default()
                };

                let Some(acc) = guards.get_mut(ns) else {
                    continue;
                };
                let outcome = acc.merge(RetrieveRequestResult {
                    code: sub.code,
                    messages,
                    namespace: *ns,
                });
                fresh.entry(*ns).or_default().extend(outcome.added);
                if outcome.more {
                    next.push(*ns);
                }
            }
            pending = next;
        }
        Ok(())
    }

    /// Decrypt and gate one message. Rejections are dropped silently.
    async fn deliver(&self, target: &SwarmPubkey, namespace: Namespace, message: &RetrievedMessage) {
        let content = match self.codec.open(target, message) {
            Ok(c) => c,
            Err(e) => {
                debug!(hash = %message.hash, error = %e, "Could not open envelope");
                return;
            }
        };

        if !should_process_content_message(
            content.envelope_timestamp,
            content.sig_timestamp,
            content.is_community,
        ) {
            debug!(hash = %content.hash, "Dropping message with mismatched signed timestamp");
            return;
        }

        self.notify(PollerNotification::ContentAccepted {
            target: target.clone(),
            namespace,
            content,
        })
        .await;
    }

    async fn send_message(&self, message: OutgoingMessage) {
        let identifier = message.identifier.clone();
        match self.store(message).await {
            Ok(hash) => {
                debug!(id = %identifier, hash = ?hash, "Message stored");
                self.notify(PollerNotification::MessageStored { identifier, hash })
                    .await;
            }
            Err(e) => {
                warn!(id = %identifier, error = %e, "Message store failed");
                self.notify(PollerNotification::SendFailed {
                    identifier,
                    error: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn store(&self, message: OutgoingMessage) -> Result<Option<String>, SwarmError> {
        let data = self.codec.seal(&message)?;
        let request = self.encoder.encode(Operation::Store {
            target: message.device.clone(),
            namespace: message.namespace,
            data,
            ttl_ms: message.ttl_ms,
            hash: None,
        })?;
        let batch = BatchRequest::new(message.device, vec![request]);
        let result = self.client.send(&batch).await?;

        let sub = result
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SwarmError::Protocol("empty store response".into()))?;
        if !sub.is_success() {
            return Err(SwarmError::Protocol(format!("store rejected with {}", sub.code)));
        }
        Ok(serde_json::from_value::<StoreResponseBody>(sub.body)
            .ok()
            .map(|b| b.hash))
    }

    async fn expire(
        &self,
        target: SwarmPubkey,
        hashes: Vec<String>,
        expiry_ms: u64,
        mode: ExpiryMode,
    ) -> Result<SwarmApplySummary, SwarmError> {
        let request = self.encoder.encode(Operation::Expire {
            target: target.clone(),
            hashes: hashes.clone(),
            expiry_ms,
            mode,
        })?;
        let batch = BatchRequest::new(target.clone(), vec![request]);
        let result = self.client.send(&batch).await?;

        let sub = result
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SwarmError::Protocol("empty expire response".into()))?;
        if !sub.is_success() {
            return Err(SwarmError::Protocol(format!("expire rejected with {}", sub.code)));
        }
        let body: ExpireResponseBody = serde_json::from_value(sub.body)?;
        let summary = self
            .expiry
            .lock()
            .await
            .apply_swarm_results(&target, &hashes, &body.swarm);
        Ok(summary)
    }
}

/// A watched swarm is polled on a tick only once its previous poll is done.
fn poll_due(running: &HashMap<SwarmPubkey, JoinHandle<()>>, target: &SwarmPubkey) -> bool {
    running.get(target).map_or(true, JoinHandle::is_finished)
}

/// Spawn the poller in a background tokio task.
///
/// Returns `(command_tx, notification_rx)`.
pub fn spawn_poller(
    ctx: PollerContext,
) -> (mpsc::Sender<PollerCommand>, mpsc::Receiver<PollerNotification>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PollerCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<PollerNotification>(256);

    let worker = Worker {
        client: ctx.client,
        encoder: ctx.encoder,
        codec: ctx.codec,
        expiry: ctx.expiry,
        slots: Arc::new(Mutex::new(HashMap::new())),
        notif_tx,
    };
    let poll_interval = ctx.poll_interval.max(Duration::from_millis(100));
    let refresh_interval = ctx.membership_refresh_interval.max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut watched: HashMap<SwarmPubkey, Vec<Namespace>> = HashMap::new();
        let mut running: HashMap<SwarmPubkey, JoinHandle<()>> = HashMap::new();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_ticker = tokio::time::interval_at(Instant::now() + refresh_interval, refresh_interval);
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::Poll { target, namespaces }) => {
                            worker.spawn_poll(target, namespaces);
                        }
                        Some(PollerCommand::Watch { target, namespaces }) => {
                            info!(swarm = %target.short(), namespaces = namespaces.len(), "Watching swarm");
                            watched.insert(target.clone(), namespaces.clone());
                            let handle = worker.spawn_watch(target.clone(), namespaces);
                            running.insert(target, handle);
                        }
                        Some(PollerCommand::Unwatch(target)) => {
                            if watched.remove(&target).is_some() {
                                running.remove(&target);
                                let forgotten = worker.forget(&target).await;
                                info!(swarm = %target.short(), forgotten, "Stopped watching swarm");
                            }
                        }
                        Some(PollerCommand::RefreshNodes) => {
                            let w = worker.clone();
                            tokio::spawn(async move { w.refresh_nodes().await });
                        }
                        Some(PollerCommand::Send(message)) => {
                            let w = worker.clone();
                            tokio::spawn(async move { w.send_message(message).await });
                        }
                        Some(PollerCommand::Expire { target, hashes, expiry_ms, mode }) => {
                            let w = worker.clone();
                            tokio::spawn(async move {
                                let notification = match w.expire(target.clone(), hashes, expiry_ms, mode).await {
                                    Ok(summary) => PollerNotification::ExpiryUpdated { target, summary },
                                    Err(e) => {
                                        warn!(swarm = %target.short(), error = %e, "Expire failed");
                                        PollerNotification::ExpiryFailed { target, error: e.to_string() }
                                    }
                                };
                                w.notify(notification).await;
                            });
                        }
                        Some(PollerCommand::Shutdown) => {
                            info!("Poller shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down poller");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    for (target, namespaces) in &watched {
                        if !poll_due(&running, target) {
                            debug!(swarm = %target.short(), "Previous poll still running, skipping tick");
                            continue;
                        }
                        let handle = worker.spawn_poll(target.clone(), namespaces.clone());
                        running.insert(target.clone(), handle);
                    }
                }

                _ = refresh_ticker.tick() => {
                    let w = worker.clone();
                    tokio::spawn(async move { w.refresh_nodes().await });
                }
            }
        }

        info!("Poller task terminated");
    });

    (cmd_tx, notif_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::{json, Value};

    use swarmlink_shared::error::CryptoError;
    use swarmlink_shared::identity::{Identity, RequestSigner};
    use swarmlink_shared::protocol::{EncryptionMode, ExpireMessageResultItem};

    use crate::client::tests::{client_over, member, ScriptedNetwork};
    use crate::expiry::canonical_bytes;
    use crate::nodes::ServiceNode;
    use crate::onion::tests::{keyed_node, KeyedNode};

    const PAGE_SIZE: usize = 2;

    /// Plaintext envelope: `envelope_ts:sig_ts:community`.
    struct PlainCodec;

    impl EnvelopeCodec for PlainCodec {
        fn seal(&self, message: &OutgoingMessage) -> Result<Vec<u8>, CryptoError> {
            Ok(message.plaintext.clone())
        }

        fn open(&self, _swarm: &SwarmPubkey, message: &RetrievedMessage) -> Result<DecryptedContent, CryptoError> {
            let text = String::from_utf8(message.data.clone()).map_err(|_| CryptoError::DecryptionFailed)?;
            let parts: Vec<&str> = text.split(':').collect();
            let [env, sig, community] = parts.as_slice() else {
                return Err(CryptoError::DecryptionFailed);
            };
            Ok(DecryptedContent {
                hash: message.hash.clone(),
                sender: None,
                envelope_timestamp: env.parse().map_err(|_| CryptoError::DecryptionFailed)?,
                sig_timestamp: sig.parse().ok(),
                is_community: *community == "true",
                body: message.data.clone(),
            })
        }
    }

    fn stored(hash: &str, stored_at: u64, envelope: &str) -> Value {
        json!({
            "hash": hash,
            "expiration": u64::MAX / 2,
            "data": STANDARD.encode(envelope.as_bytes()),
            "storedAt": stored_at,
        })
    }

    /// Serves retrieve pages of `PAGE_SIZE` from a fixed message list,
    /// honouring `last_hash`, acknowledges stores and lists its first two
    /// nodes as the swarm of anyone.
    fn swarm_store(messages: Vec<Value>) -> ScriptedNetwork {
        let keyed: Vec<KeyedNode> = (1..=6).map(keyed_node).collect();
        let nodes: Vec<ServiceNode> = keyed.iter().map(|k| k.node.clone()).collect();
        ScriptedNetwork::with_nodes(
            keyed,
            Box::new(move |_, request| match request["method"].as_str() {
                Some("retrieve") => {
                    let start = match request["params"]["last_hash"].as_str() {
                        Some(last) => messages
                            .iter()
                            .position(|m| m["hash"] == last)
                            .map_or(0, |i| i + 1),
                        None => 0,
                    };
                    let page: Vec<Value> = messages.iter().skip(start).take(PAGE_SIZE).cloned().collect();
                    let more = start + page.len() < messages.len();
                    json!({"code": 200, "body": {"messages": page, "more": more, "t": 1}})
                }
                Some("store") => json!({"code": 200, "body": {"hash": "stored-hash"}}),
                Some("get_swarm") => json!({"code": 200, "body": {"snodes": [member(&nodes[0]), member(&nodes[1])]}}),
                Some("oxend_request") => json!({"code": 200, "body": {"result": {"service_node_states":
                    nodes.iter().map(|n| {
                        let (ip, port) = n.address.rsplit_once(':').unwrap();
                        json!({
                            "public_ip": ip,
                            "storage_port": port.parse::<u16>().unwrap(),
                            "pubkey_ed25519": hex::encode(n.pubkey_ed25519),
                            "pubkey_x25519": hex::encode(n.pubkey_x25519),
                        })
                    }).collect::<Vec<_>>()
                }}}),
                _ => json!({"code": 400, "body": {}}),
            }),
        )
    }

    struct Harness {
        tx: mpsc::Sender<PollerCommand>,
        rx: mpsc::Receiver<PollerNotification>,
        me: SwarmPubkey,
        expiry: Arc<Mutex<ExpiryCoordinator>>,
        client: Arc<SwarmClient>,
    }

    async fn start(network: Arc<ScriptedNetwork>) -> Harness {
        let user = Arc::new(Identity::generate());
        let me = user.user_pubkey();
        let client = Arc::new(client_over(network, 3).await);
        let expiry = Arc::new(Mutex::new(ExpiryCoordinator::new()));
        let (tx, rx) = spawn_poller(PollerContext {
            client: client.clone(),
            encoder: Arc::new(RequestEncoder::new(me.clone(), user)),
            codec: Arc::new(PlainCodec),
            expiry: expiry.clone(),
            poll_interval: Duration::from_secs(3600),
            membership_refresh_interval: Duration::from_secs(3600),
        });
        Harness {
            tx,
            rx,
            me,
            expiry,
            client,
        }
    }

    /// Worker driven directly, without the command loop.
    async fn worker_over(network: Arc<ScriptedNetwork>) -> (Worker, SwarmPubkey, mpsc::Receiver<PollerNotification>) {
        let user = Arc::new(Identity::generate());
        let me = user.user_pubkey();
        let (notif_tx, notif_rx) = mpsc::channel(256);
        let worker = Worker {
            client: Arc::new(client_over(network, 3).await),
            encoder: Arc::new(RequestEncoder::new(me.clone(), user)),
            codec: Arc::new(PlainCodec),
            expiry: Arc::new(Mutex::new(ExpiryCoordinator::new())),
            slots: Arc::new(Mutex::new(HashMap::new())),
            notif_tx,
        };
        (worker, me, notif_rx)
    }

    async fn poll_once(h: &mut Harness, namespaces: Vec<Namespace>) -> Vec<PollerNotification> {
        h.tx.send(PollerCommand::Poll {
            target: h.me.clone(),
            namespaces,
        })
        .await
        .unwrap();
        until_polled(&mut h.rx, 1).await
    }

    /// Collect notifications until `completions` polls have finished.
    async fn until_polled(rx: &mut mpsc::Receiver<PollerNotification>, completions: usize) -> Vec<PollerNotification> {
        let mut seen = Vec::new();
        let mut done = 0;
        while done < completions {
            let n = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(n, PollerNotification::PollCompleted { .. } | PollerNotification::PollFailed { .. }) {
                done += 1;
            }
            seen.push(n);
        }
        seen
    }

    fn retrieved_hashes(notifications: &[PollerNotification]) -> Vec<String> {
        notifications
            .iter()
            .filter_map(|n| match n {
                PollerNotification::MessagesRetrieved { hashes, .. } => Some(hashes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn accepted_hashes(notifications: &[PollerNotification]) -> Vec<String> {
        notifications
            .iter()
            .filter_map(|n| match n {
                PollerNotification::ContentAccepted { content, .. } => Some(content.hash.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_poll_pages_until_done_and_gates_content() {
        let network = Arc::new(swarm_store(vec![
            stored("m1", 1, "100:100:false"),
            stored("m2", 2, "200:201:false"),
            stored("m3", 3, "300:0:false"),
            stored("m4", 4, "400:9999999999:true"),
            stored("m5", 5, "garbage"),
        ]));
        let mut h = start(network.clone()).await;

        let notifications = poll_once(&mut h, vec![Namespace::DEFAULT]).await;

        assert_eq!(retrieved_hashes(&notifications), vec!["m1", "m2", "m3", "m4", "m5"]);
        // 5 messages at 2 per page
        assert_eq!(network.calls(), 3);
        assert_eq!(accepted_hashes(&notifications), vec!["m1", "m3"]);
        assert_eq!(h.expiry.lock().await.len(), 5);

        match notifications.last() {
            Some(PollerNotification::PollCompleted { new_messages, .. }) => assert_eq!(*new_messages, 5),
            other => panic!("expected PollCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_page_does_not_stall_pagination() {
        let bad = |hash: &str| json!({"hash": hash, "expiration": u64::MAX / 2, "data": "%%%", "storedAt": 1});
        let network = Arc::new(swarm_store(vec![bad("x1"), bad("x2"), stored("m3", 3, "300:300:false")]));
        let mut h = start(network.clone()).await;

        let notifications = poll_once(&mut h, vec![Namespace::DEFAULT]).await;
        assert_eq!(retrieved_hashes(&notifications), vec!["m3"]);
        assert_eq!(accepted_hashes(&notifications), vec!["m3"]);
        assert_eq!(network.calls(), 2);

        // The next poll resumes after m3 and finds nothing new
        let again = poll_once(&mut h, vec![Namespace::DEFAULT]).await;
        assert!(retrieved_hashes(&again).is_empty());
        assert_eq!(network.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejected_content_surfaces_only_as_hash() {
        let network = Arc::new(swarm_store(vec![stored("m1", 1, "500:501:false")]));
        let mut h = start(network).await;

        let notifications = poll_once(&mut h, vec![Namespace::DEFAULT]).await;
        assert_eq!(retrieved_hashes(&notifications), vec!["m1"]);
        assert!(accepted_hashes(&notifications).is_empty());
        assert_eq!(notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_polls_never_duplicate() {
        let messages: Vec<Value> = (0..7).map(|i| stored(&format!("h{i}"), i, "1:1:false")).collect();
        let network = Arc::new(swarm_store(messages));
        let mut h = start(network).await;

        for _ in 0..3 {
            h.tx.send(PollerCommand::Poll {
                target: h.me.clone(),
                namespaces: vec![Namespace::DEFAULT],
            })
            .await
            .unwrap();
        }
        let notifications = until_polled(&mut h.rx, 3).await;

        let hashes = retrieved_hashes(&notifications);
        let unique: HashSet<_> = hashes.iter().collect();
        assert_eq!(hashes.len(), 7);
        assert_eq!(unique.len(), 7);
    }

    #[tokio::test]
    async fn test_poll_prunes_expired_state() {
        let expired = json!({
            "hash": "gone",
            "expiration": 1,
            "data": STANDARD.encode(b"1:1:false"),
            "storedAt": 0,
        });
        let network = Arc::new(swarm_store(vec![expired, stored("kept", 1, "1:1:false")]));
        let (worker, me, _rx) = worker_over(network).await;

        assert_eq!(worker.poll(&me, vec![Namespace::DEFAULT]).await.unwrap(), 2);

        let slot = worker.slot(&me, Namespace::DEFAULT).await;
        let acc = slot.lock().await;
        assert_eq!(acc.seen_len(Namespace::DEFAULT), 1);
        assert!(acc.messages(Namespace::DEFAULT).is_empty());
        drop(acc);

        let ledger = worker.expiry.lock().await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.expiry_of("gone"), None);
    }

    #[tokio::test]
    async fn test_forget_drops_every_namespace_of_target() {
        let network = Arc::new(swarm_store(vec![stored("m1", 1, "1:1:false")]));
        let (worker, me, _rx) = worker_over(network).await;
        let other = Identity::generate().user_pubkey();

        worker
            .poll(&me, vec![Namespace::DEFAULT, Namespace::USER_PROFILE])
            .await
            .unwrap();
        worker.slot(&other, Namespace::DEFAULT).await;
        assert_eq!(worker.slots.lock().await.len(), 3);

        assert_eq!(worker.forget(&me).await, 2);
        let slots = worker.slots.lock().await;
        assert_eq!(slots.len(), 1);
        assert!(slots.contains_key(&(other, Namespace::DEFAULT)));
    }

    #[tokio::test]
    async fn test_running_poll_is_not_due() {
        let target = Identity::generate().user_pubkey();
        let mut running = HashMap::new();
        assert!(poll_due(&running, &target));

        running.insert(target.clone(), tokio::spawn(std::future::pending::<()>()));
        assert!(!poll_due(&running, &target));

        let finished = tokio::spawn(async {});
        while !finished.is_finished() {
            tokio::task::yield_now().await;
        }
        running.insert(target.clone(), finished);
        assert!(poll_due(&running, &target));
    }

    #[tokio::test]
    async fn test_watch_locates_swarm_before_polling() {
        let network = Arc::new(swarm_store(vec![stored("m1", 1, "1:1:false")]));
        let mut h = start(network.clone()).await;

        h.tx.send(PollerCommand::Watch {
            target: h.me.clone(),
            namespaces: vec![Namespace::DEFAULT],
        })
        .await
        .unwrap();
        let notifications = until_polled(&mut h.rx, 1).await;
        assert_eq!(retrieved_hashes(&notifications), vec!["m1"]);

        assert!(h.client.directory().has_swarm(&h.me).await);
        let members: HashSet<[u8; 32]> = h
            .client
            .directory()
            .swarm_nodes(&h.me, &HashSet::new())
            .await
            .into_iter()
            .map(|(_, n)| n.pubkey_ed25519)
            .collect();
        assert_eq!(members, HashSet::from([[1u8; 32], [2u8; 32]]));
        // lookup plus one page
        assert_eq!(network.calls(), 2);
    }

    #[tokio::test]
    async fn test_wrong_swarm_reply_updates_membership() {
        let keyed: Vec<KeyedNode> = (1..=6).map(keyed_node).collect();
        let home = keyed[4].node.clone();
        let network = Arc::new(ScriptedNetwork::with_nodes(
            keyed,
            Box::new(move |_, _| json!({"code": 421, "body": {"snodes": [member(&home)]}})),
        ));
        let mut h = start(network).await;

        let notifications = poll_once(&mut h, vec![Namespace::DEFAULT]).await;
        assert!(retrieved_hashes(&notifications).is_empty());

        let members = h.client.directory().swarm_nodes(&h.me, &HashSet::new()).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].1.pubkey_ed25519, [5u8; 32]);
    }

    #[tokio::test]
    async fn test_refresh_nodes_command() {
        let network = Arc::new(swarm_store(vec![]));
        let mut h = start(network).await;

        h.tx.send(PollerCommand::RefreshNodes).await.unwrap();
        match tokio::time::timeout(Duration::from_secs(10), h.rx.recv()).await.unwrap() {
            Some(PollerNotification::NodesRefreshed { count }) => assert_eq!(count, 6),
            other => panic!("expected NodesRefreshed, got {other:?}"),
        }
        assert_eq!(h.client.directory().viable_nodes(&HashSet::new()).await.len(), 6);
    }

    #[tokio::test]
    async fn test_send_reports_stored_hash() {
        let network = Arc::new(swarm_store(vec![]));
        let mut h = start(network).await;

        let message = OutgoingMessage::new(
            h.me.clone(),
            Namespace::DEFAULT,
            b"hello".to_vec(),
            60_000,
            EncryptionMode::SessionMessage,
        );
        let id = message.identifier.clone();
        h.tx.send(PollerCommand::Send(message)).await.unwrap();

        match tokio::time::timeout(Duration::from_secs(10), h.rx.recv()).await.unwrap() {
            Some(PollerNotification::MessageStored { identifier, hash }) => {
                assert_eq!(identifier, id);
                assert_eq!(hash.as_deref(), Some("stored-hash"));
            }
            other => panic!("expected MessageStored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expire_applies_verified_results() {
        // One swarm member signs its answer, another cannot resolve the target
        let signer = Identity::generate();
        let node_hex = hex::encode(signer.public_key_bytes());

        let network = Arc::new(ScriptedNetwork::new(
            6,
            Box::new(move |_, request| {
                let params = &request["params"];
                let target = SwarmPubkey::from_hex(params["pubkey"].as_str().unwrap()).unwrap();
                let requested: Vec<String> = serde_json::from_value(params["messages"].clone()).unwrap();
                let mut item = ExpireMessageResultItem {
                    expiry: params["expiry"].as_u64().unwrap(),
                    updated: requested.clone(),
                    ..Default::default()
                };
                let bytes = canonical_bytes(&target, &requested, &item);
                item.signature = STANDARD.encode(signer.sign(&bytes).unwrap().to_bytes());
                json!({"code": 200, "body": {"swarm": {
                    (hex::encode(signer.public_key_bytes())): item,
                    (hex::encode([7u8; 32])): {"failed": true},
                }}})
            }),
        ));
        let mut h = start(network).await;

        h.tx.send(PollerCommand::Expire {
            target: h.me.clone(),
            hashes: vec!["a".into(), "b".into()],
            expiry_ms: 123_456,
            mode: ExpiryMode::Unspecified,
        })
        .await
        .unwrap();

        match tokio::time::timeout(Duration::from_secs(10), h.rx.recv()).await.unwrap() {
            Some(PollerNotification::ExpiryUpdated { summary, .. }) => {
                assert_eq!(summary.applied, vec![node_hex]);
                assert_eq!(summary.failed, vec![hex::encode([7u8; 32])]);
            }
            other => panic!("expected ExpiryUpdated, got {other:?}"),
        }
        assert_eq!(h.expiry.lock().await.expiry_of("a"), Some(123_456));
    }

    #[tokio::test]
    async fn test_shutdown_closes_notifications() {
        let network = Arc::new(swarm_store(vec![]));
        let mut h = start(network).await;

        h.tx.send(PollerCommand::Shutdown).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(10), h.rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
