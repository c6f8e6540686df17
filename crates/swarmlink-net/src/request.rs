//! Sub-request construction, signing and batching.
//!
//! Every storage RPC the client issues is one variant of [`SubRequest`].
//! [`RequestEncoder`] validates an [`Operation`], signs it with the key that
//! owns the target swarm and produces the immutable sub-request; batches are
//! then grouped per target swarm by [`BatchRequest::group`].

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};

use swarmlink_shared::constants::{MAX_SUBREQUESTS_PER_BATCH, TTL_MAX_MS};
use swarmlink_shared::error::SwarmError;
use swarmlink_shared::identity::RequestSigner;
use swarmlink_shared::protocol::SignedHashesParams;
use swarmlink_shared::types::{now_ms, Namespace, SwarmPubkey};

/// How an expire request treats the current expiry of each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryMode {
    /// Set the given expiry whatever the current one is.
    #[default]
    Unspecified,
    /// Only move expiries later.
    Extend,
    /// Only move expiries earlier.
    Shorten,
}

impl ExpiryMode {
    fn as_str(&self) -> &'static str {
        match self {
            ExpiryMode::Unspecified => "",
            ExpiryMode::Extend => "extend",
            ExpiryMode::Shorten => "shorten",
        }
    }
}

/// Caller-side description of a storage operation, before validation and
/// signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Retrieve {
        target: SwarmPubkey,
        namespace: Namespace,
        last_hash: Option<String>,
    },
    Store {
        target: SwarmPubkey,
        namespace: Namespace,
        data: Vec<u8>,
        ttl_ms: u64,
        hash: Option<String>,
    },
    Delete {
        target: SwarmPubkey,
        hashes: Vec<String>,
    },
    Expire {
        target: SwarmPubkey,
        hashes: Vec<String>,
        expiry_ms: u64,
        mode: ExpiryMode,
    },
    RevokeSubaccount {
        target: SwarmPubkey,
        token: Vec<u8>,
    },
    UnrevokeSubaccount {
        target: SwarmPubkey,
        token: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrieveParams {
    pub pubkey: SwarmPubkey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey_ed25519: Option<String>,
    pub namespace: Namespace,
    pub timestamp: u64,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreParams {
    pub pubkey: SwarmPubkey,
    pub namespace: Namespace,
    /// base64 ciphertext
    pub data: String,
    pub ttl: u64,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey_ed25519: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Hash the caller expects the node to report back. Never sent.
    #[serde(skip)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteParams {
    pub pubkey: SwarmPubkey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey_ed25519: Option<String>,
    #[serde(rename = "messagesHashes")]
    pub messages: Vec<String>,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpireParams {
    #[serde(flatten)]
    pub signed: SignedHashesParams,
    pub expiry: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub extend: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub shorten: bool,
}

impl ExpireParams {
    pub fn mode(&self) -> ExpiryMode {
        match (self.extend, self.shorten) {
            (true, _) => ExpiryMode::Extend,
            (_, true) => ExpiryMode::Shorten,
            _ => ExpiryMode::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubaccountParams {
    pub pubkey: SwarmPubkey,
    /// hex subaccount token
    pub token: String,
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetSwarmParams {
    pub pubkey: SwarmPubkey,
}

/// `oxend_request` asking for the active service node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceNodeListParams {
    /// Swarm whose nodes carry the request; any node can answer. Never sent.
    #[serde(skip)]
    pub via: SwarmPubkey,
    pub endpoint: String,
    pub params: Value,
}

/// A validated, signed storage RPC. Immutable once built.
///
/// The two network queries at the end are unsigned and can be answered by
/// any storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubRequest {
    Retrieve(RetrieveParams),
    Store(StoreParams),
    Delete(DeleteParams),
    Expire(ExpireParams),
    RevokeSubaccount(SubaccountParams),
    UnrevokeSubaccount(SubaccountParams),
    GetSwarm(GetSwarmParams),
    GetServiceNodes(ServiceNodeListParams),
}

impl SubRequest {
    /// Ask which nodes currently hold `target`.
    pub fn get_swarm(target: SwarmPubkey) -> Self {
        SubRequest::GetSwarm(GetSwarmParams { pubkey: target })
    }

    /// Ask for every active service node, routed through `via`'s swarm.
    pub fn get_service_nodes(via: SwarmPubkey) -> Self {
        SubRequest::GetServiceNodes(ServiceNodeListParams {
            via,
            endpoint: "get_service_nodes".into(),
            params: json!({
                "active_only": true,
                "fields": {
                    "public_ip": true,
                    "storage_port": true,
                    "pubkey_ed25519": true,
                    "pubkey_x25519": true,
                },
            }),
        })
    }

    pub fn method(&self) -> &'static str {
        match self {
            SubRequest::Retrieve(_) => "retrieve",
            SubRequest::Store(_) => "store",
            SubRequest::Delete(_) => "delete",
            SubRequest::Expire(_) => "expire",
            SubRequest::RevokeSubaccount(_) => "revoke_subaccount",
            SubRequest::UnrevokeSubaccount(_) => "unrevoke_subaccount",
            SubRequest::GetSwarm(_) => "get_swarm",
            SubRequest::GetServiceNodes(_) => "oxend_request",
        }
    }

    /// Swarm the request is addressed to.
    pub fn target(&self) -> &SwarmPubkey {
        match self {
            SubRequest::Retrieve(p) => &p.pubkey,
            SubRequest::Store(p) => &p.pubkey,
            SubRequest::Delete(p) => &p.pubkey,
            SubRequest::Expire(p) => &p.signed.pubkey,
            SubRequest::RevokeSubaccount(p) | SubRequest::UnrevokeSubaccount(p) => &p.pubkey,
            SubRequest::GetSwarm(p) => &p.pubkey,
            SubRequest::GetServiceNodes(p) => &p.via,
        }
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match self {
            SubRequest::Retrieve(p) => Some(p.namespace),
            SubRequest::Store(p) => Some(p.namespace),
            _ => None,
        }
    }

    /// `{"method": .., "params": {..}}`
    pub fn to_wire(&self) -> Result<Value, SwarmError> {
        let params = match self {
            SubRequest::Retrieve(p) => serde_json::to_value(p)?,
            SubRequest::Store(p) => serde_json::to_value(p)?,
            SubRequest::Delete(p) => serde_json::to_value(p)?,
            SubRequest::Expire(p) => serde_json::to_value(p)?,
            SubRequest::RevokeSubaccount(p) | SubRequest::UnrevokeSubaccount(p) => {
                serde_json::to_value(p)?
            }
            SubRequest::GetSwarm(p) => serde_json::to_value(p)?,
            SubRequest::GetServiceNodes(p) => serde_json::to_value(p)?,
        };
        Ok(json!({ "method": self.method(), "params": params }))
    }
}

/// Ordered sub-requests sent to one swarm in a single onion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub target: SwarmPubkey,
    pub requests: Vec<SubRequest>,
}

impl BatchRequest {
    pub fn new(target: SwarmPubkey, requests: Vec<SubRequest>) -> Self {
        Self { target, requests }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Group by target swarm, keeping first-seen target order and the order
    /// of requests within each target. Groups over the node limit are split.
    pub fn group(requests: Vec<SubRequest>) -> Vec<BatchRequest> {
        let mut order: Vec<SwarmPubkey> = Vec::new();
        let mut by_target: HashMap<SwarmPubkey, Vec<SubRequest>> = HashMap::new();

        for request in requests {
            let target = request.target().clone();
            if !by_target.contains_key(&target) {
                order.push(target.clone());
            }
            by_target.entry(target).or_default().push(request);
        }

        let mut batches = Vec::new();
        for target in order {
            let Some(mut pending) = by_target.remove(&target) else {
                continue;
            };
            while !pending.is_empty() {
                let take = pending.len().min(MAX_SUBREQUESTS_PER_BATCH);
                let chunk: Vec<SubRequest> = pending.drain(..take).collect();
                batches.push(BatchRequest::new(target.clone(), chunk));
            }
        }
        batches
    }

    /// `{"requests": [..]}` as sent to the destination node.
    pub fn to_json(&self) -> Result<Vec<u8>, SwarmError> {
        let requests = self
            .requests
            .iter()
            .map(SubRequest::to_wire)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::to_vec(&json!({ "requests": requests }))?)
    }
}

/// Builds signed sub-requests on behalf of the local account and of the
/// groups whose signing key is held.
pub struct RequestEncoder {
    user: SwarmPubkey,
    user_signer: Arc<dyn RequestSigner>,
    group_signers: HashMap<SwarmPubkey, Arc<dyn RequestSigner>>,
}

impl RequestEncoder {
    pub fn new(user: SwarmPubkey, user_signer: Arc<dyn RequestSigner>) -> Self {
        Self {
            user,
            user_signer,
            group_signers: HashMap::new(),
        }
    }

    pub fn with_group_signer(mut self, group: SwarmPubkey, signer: Arc<dyn RequestSigner>) -> Self {
        self.add_group_signer(group, signer);
        self
    }

    pub fn add_group_signer(&mut self, group: SwarmPubkey, signer: Arc<dyn RequestSigner>) {
        self.group_signers.insert(group, signer);
    }

    pub fn user(&self) -> &SwarmPubkey {
        &self.user
    }

    pub fn encode(&self, operation: Operation) -> Result<SubRequest, SwarmError> {
        self.encode_at(operation, now_ms())
    }

    /// [`encode`](Self::encode) with an explicit request timestamp.
    pub fn encode_at(&self, operation: Operation, now_ms: u64) -> Result<SubRequest, SwarmError> {
        match operation {
            Operation::Retrieve {
                target,
                namespace,
                last_hash,
            } => {
                check_namespace(&target, namespace)?;
                let mut payload = b"retrieve".to_vec();
                if namespace != Namespace::DEFAULT {
                    payload.extend_from_slice(namespace.to_string().as_bytes());
                }
                payload.extend_from_slice(now_ms.to_string().as_bytes());

                let (signer, pubkey_ed25519) = self.signer_for(&target)?;
                Ok(SubRequest::Retrieve(RetrieveParams {
                    pubkey: target,
                    pubkey_ed25519,
                    namespace,
                    timestamp: now_ms,
                    signature: sign_b64(signer, &payload)?,
                    last_hash: last_hash.filter(|h| !h.is_empty()),
                }))
            }

            Operation::Store {
                target,
                namespace,
                data,
                ttl_ms,
                hash,
            } => {
                check_namespace(&target, namespace)?;
                if data.is_empty() {
                    return Err(SwarmError::InvalidOperation("store without data".into()));
                }
                if ttl_ms == 0 || ttl_ms > TTL_MAX_MS {
                    return Err(SwarmError::InvalidOperation(format!(
                        "store ttl {ttl_ms}ms out of range"
                    )));
                }

                // Storing into someone else's swarm is unauthenticated
                let (signature, pubkey_ed25519) = match self.signer_for(&target) {
                    Ok((signer, ed)) => {
                        let payload = format!("store{}{}", namespace, now_ms);
                        (Some(sign_b64(signer, payload.as_bytes())?), ed)
                    }
                    Err(_) => (None, None),
                };

                Ok(SubRequest::Store(StoreParams {
                    pubkey: target,
                    namespace,
                    data: STANDARD.encode(&data),
                    ttl: ttl_ms,
                    timestamp: now_ms,
                    pubkey_ed25519,
                    signature,
                    hash,
                }))
            }

            Operation::Delete { target, hashes } => {
                let hashes = require_hashes("delete", hashes)?;
                let mut payload = b"delete".to_vec();
                for h in &hashes {
                    payload.extend_from_slice(h.as_bytes());
                }

                let (signer, pubkey_ed25519) = self.signer_for(&target)?;
                Ok(SubRequest::Delete(DeleteParams {
                    pubkey: target,
                    pubkey_ed25519,
                    messages: hashes,
                    signature: sign_b64(signer, &payload)?,
                }))
            }

            Operation::Expire {
                target,
                hashes,
                expiry_ms,
                mode,
            } => {
                let hashes = require_hashes("expire", hashes)?;
                if expiry_ms == 0 {
                    return Err(SwarmError::InvalidOperation("expire without expiry".into()));
                }
                let mut payload = format!("expire{}{}", mode.as_str(), expiry_ms).into_bytes();
                for h in &hashes {
                    payload.extend_from_slice(h.as_bytes());
                }

                let (signer, pubkey_ed25519) = self.signer_for(&target)?;
                let signature = sign_b64(signer, &payload)?;
                Ok(SubRequest::Expire(ExpireParams {
                    signed: SignedHashesParams {
                        pubkey: target,
                        pubkey_ed25519,
                        messages: hashes,
                        signature,
                    },
                    expiry: expiry_ms,
                    extend: mode == ExpiryMode::Extend,
                    shorten: mode == ExpiryMode::Shorten,
                }))
            }

            Operation::RevokeSubaccount { target, token } => {
                let params = self.subaccount_params("revoke_subaccount", target, token, now_ms)?;
                Ok(SubRequest::RevokeSubaccount(params))
            }

            Operation::UnrevokeSubaccount { target, token } => {
                let params = self.subaccount_params("unrevoke_subaccount", target, token, now_ms)?;
                Ok(SubRequest::UnrevokeSubaccount(params))
            }
        }
    }

    fn subaccount_params(
        &self,
        method: &str,
        target: SwarmPubkey,
        token: Vec<u8>,
        now_ms: u64,
    ) -> Result<SubaccountParams, SwarmError> {
        if !target.is_group() {
            return Err(SwarmError::InvalidOperation(format!(
                "{method} needs a group target, got {}",
                target.short()
            )));
        }
        if token.is_empty() {
            return Err(SwarmError::InvalidOperation(format!("{method} without token")));
        }

        let mut payload = format!("{method}{now_ms}").into_bytes();
        payload.extend_from_slice(&token);

        let (signer, _) = self.signer_for(&target)?;
        Ok(SubaccountParams {
            pubkey: target,
            token: hex::encode(&token),
            timestamp: now_ms,
            signature: sign_b64(signer, &payload)?,
        })
    }

    /// Signer owning `target`, plus the `pubkey_ed25519` field user-targeted
    /// requests carry.
    fn signer_for(
        &self,
        target: &SwarmPubkey,
    ) -> Result<(&dyn RequestSigner, Option<String>), SwarmError> {
        if target.is_group() {
            return self
                .group_signers
                .get(target)
                .map(|s| (s.as_ref(), None))
                .ok_or_else(|| {
                    SwarmError::SigningFailed(format!("no signer for group {}", target.short()))
                });
        }

        if *target == self.user {
            let ed = hex::encode(self.user_signer.ed25519_public());
            return Ok((self.user_signer.as_ref(), Some(ed)));
        }

        Err(SwarmError::SigningFailed(format!(
            "no signer for {}",
            target.short()
        )))
    }
}

fn check_namespace(target: &SwarmPubkey, namespace: Namespace) -> Result<(), SwarmError> {
    if namespace.is_group() != target.is_group() {
        return Err(SwarmError::InvalidOperation(format!(
            "namespace {namespace} does not belong to {}",
            target.short()
        )));
    }
    Ok(())
}

fn require_hashes(method: &str, hashes: Vec<String>) -> Result<Vec<String>, SwarmError> {
    if hashes.is_empty() || hashes.iter().any(|h| h.is_empty()) {
        return Err(SwarmError::InvalidOperation(format!(
            "{method} needs at least one non-empty hash"
        )));
    }
    Ok(hashes)
}

fn sign_b64(signer: &dyn RequestSigner, payload: &[u8]) -> Result<String, SwarmError> {
    let signature = signer
        .sign(payload)
        .map_err(|e| SwarmError::SigningFailed(e.to_string()))?;
    Ok(STANDARD.encode(signature.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signature;
    use swarmlink_shared::error::IdentityError;
    use swarmlink_shared::identity::{verify_signature, Identity};

    const NOW: u64 = 1_700_000_000_000;

    struct BrokenSigner;

    impl RequestSigner for BrokenSigner {
        fn ed25519_public(&self) -> [u8; 32] {
            [0u8; 32]
        }

        fn sign(&self, _message: &[u8]) -> Result<Signature, IdentityError> {
            Err(IdentityError::SignerUnavailable("locked".into()))
        }
    }

    fn setup() -> (RequestEncoder, Arc<Identity>, Arc<Identity>) {
        let user = Arc::new(Identity::generate());
        let group = Arc::new(Identity::generate());
        let encoder = RequestEncoder::new(user.user_pubkey(), user.clone())
            .with_group_signer(group.group_pubkey(), group.clone());
        (encoder, user, group)
    }

    fn assert_signed(id: &Identity, payload: &[u8], signature_b64: &str) {
        let bytes = STANDARD.decode(signature_b64).unwrap();
        let signature = Signature::from_slice(&bytes).unwrap();
        verify_signature(&id.public_key_bytes(), payload, &signature).unwrap();
    }

    #[test]
    fn test_retrieve_signature_omits_default_namespace() {
        let (encoder, user, _) = setup();

        let req = encoder
            .encode_at(
                Operation::Retrieve {
                    target: user.user_pubkey(),
                    namespace: Namespace::DEFAULT,
                    last_hash: None,
                },
                NOW,
            )
            .unwrap();
        let SubRequest::Retrieve(params) = &req else {
            panic!("expected retrieve");
        };
        assert_signed(&user, format!("retrieve{NOW}").as_bytes(), &params.signature);
        assert_eq!(params.pubkey_ed25519, Some(hex::encode(user.public_key_bytes())));

        let req = encoder
            .encode_at(
                Operation::Retrieve {
                    target: user.user_pubkey(),
                    namespace: Namespace::USER_PROFILE,
                    last_hash: Some("last".into()),
                },
                NOW,
            )
            .unwrap();
        let SubRequest::Retrieve(params) = &req else {
            panic!("expected retrieve");
        };
        assert_signed(&user, format!("retrieve2{NOW}").as_bytes(), &params.signature);

        let wire = req.to_wire().unwrap();
        assert_eq!(wire["method"], "retrieve");
        assert_eq!(wire["params"]["last_hash"], "last");
        assert_eq!(wire["params"]["namespace"], 2);
    }

    #[test]
    fn test_group_request_signed_by_group_without_ed25519() {
        let (encoder, _, group) = setup();

        let req = encoder
            .encode_at(
                Operation::Delete {
                    target: group.group_pubkey(),
                    hashes: vec!["h1".into(), "h2".into()],
                },
                NOW,
            )
            .unwrap();
        let SubRequest::Delete(params) = &req else {
            panic!("expected delete");
        };
        assert!(params.pubkey_ed25519.is_none());
        assert_signed(&group, b"deleteh1h2", &params.signature);

        let wire = req.to_wire().unwrap();
        assert_eq!(wire["params"]["messagesHashes"][1], "h2");
        assert!(wire["params"].get("pubkey_ed25519").is_none());
    }

    #[test]
    fn test_expire_payload_includes_mode() {
        let (encoder, user, _) = setup();

        let req = encoder
            .encode_at(
                Operation::Expire {
                    target: user.user_pubkey(),
                    hashes: vec!["a".into()],
                    expiry_ms: NOW + 1000,
                    mode: ExpiryMode::Shorten,
                },
                NOW,
            )
            .unwrap();
        let SubRequest::Expire(params) = &req else {
            panic!("expected expire");
        };
        assert_eq!(params.mode(), ExpiryMode::Shorten);
        assert_signed(
            &user,
            format!("expireshorten{}a", NOW + 1000).as_bytes(),
            &params.signed.signature,
        );

        let wire = req.to_wire().unwrap();
        assert_eq!(wire["params"]["shorten"], true);
        assert!(wire["params"].get("extend").is_none());
        assert_eq!(wire["params"]["messages"][0], "a");
    }

    #[test]
    fn test_missing_fields_are_invalid() {
        let (encoder, user, group) = setup();

        let cases = vec![
            Operation::Delete {
                target: user.user_pubkey(),
                hashes: vec![],
            },
            Operation::Expire {
                target: user.user_pubkey(),
                hashes: vec!["a".into()],
                expiry_ms: 0,
                mode: ExpiryMode::Unspecified,
            },
            Operation::Store {
                target: user.user_pubkey(),
                namespace: Namespace::DEFAULT,
                data: vec![],
                ttl_ms: 1000,
                hash: None,
            },
            Operation::Store {
                target: user.user_pubkey(),
                namespace: Namespace::DEFAULT,
                data: vec![1],
                ttl_ms: TTL_MAX_MS + 1,
                hash: None,
            },
            Operation::RevokeSubaccount {
                target: user.user_pubkey(),
                token: vec![1, 2, 3],
            },
            Operation::UnrevokeSubaccount {
                target: group.group_pubkey(),
                token: vec![],
            },
            Operation::Retrieve {
                target: user.user_pubkey(),
                namespace: Namespace::GROUP_MESSAGES,
                last_hash: None,
            },
        ];

        for op in cases {
            let result = encoder.encode_at(op.clone(), NOW);
            assert!(
                matches!(result, Err(SwarmError::InvalidOperation(_))),
                "{op:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_signing_failures() {
        let user = Identity::generate();
        let encoder = RequestEncoder::new(user.user_pubkey(), Arc::new(BrokenSigner));

        let result = encoder.encode_at(
            Operation::Delete {
                target: user.user_pubkey(),
                hashes: vec!["h".into()],
            },
            NOW,
        );
        assert!(matches!(result, Err(SwarmError::SigningFailed(_))));

        // Unknown group: nobody can sign for it
        let result = encoder.encode_at(
            Operation::RevokeSubaccount {
                target: SwarmPubkey::group([9u8; 32]),
                token: vec![1],
            },
            NOW,
        );
        assert!(matches!(result, Err(SwarmError::SigningFailed(_))));
    }

    #[test]
    fn test_store_into_foreign_swarm_is_unsigned() {
        let (encoder, user, _) = setup();
        let other = Identity::generate().user_pubkey();

        let req = encoder
            .encode_at(
                Operation::Store {
                    target: other,
                    namespace: Namespace::DEFAULT,
                    data: b"cipher".to_vec(),
                    ttl_ms: 1000,
                    hash: Some("expected".into()),
                },
                NOW,
            )
            .unwrap();
        let SubRequest::Store(params) = &req else {
            panic!("expected store");
        };
        assert!(params.signature.is_none());
        let wire = req.to_wire().unwrap();
        assert!(wire["params"].get("hash").is_none());
        assert_eq!(wire["params"]["data"], STANDARD.encode(b"cipher"));

        let own = encoder
            .encode_at(
                Operation::Store {
                    target: user.user_pubkey(),
                    namespace: Namespace::USER_PROFILE,
                    data: b"cipher".to_vec(),
                    ttl_ms: 1000,
                    hash: None,
                },
                NOW,
            )
            .unwrap();
        let SubRequest::Store(params) = &own else {
            panic!("expected store");
        };
        assert_signed(
            &user,
            format!("store2{NOW}").as_bytes(),
            params.signature.as_deref().unwrap(),
        );
    }

    #[test]
    fn test_revoke_signs_timestamp_and_token() {
        let (encoder, _, group) = setup();
        let req = encoder
            .encode_at(
                Operation::RevokeSubaccount {
                    target: group.group_pubkey(),
                    token: vec![0xab, 0xcd],
                },
                NOW,
            )
            .unwrap();
        let SubRequest::RevokeSubaccount(params) = &req else {
            panic!("expected revoke");
        };
        let mut payload = format!("revoke_subaccount{NOW}").into_bytes();
        payload.extend_from_slice(&[0xab, 0xcd]);
        assert_signed(&group, &payload, &params.signature);
        assert_eq!(params.token, "abcd");
        assert_eq!(req.method(), "revoke_subaccount");
    }

    #[test]
    fn test_group_batches_by_target_and_limit() {
        let (encoder, user, group) = setup();
        let mut requests = Vec::new();
        for i in 0..25 {
            requests.push(
                encoder
                    .encode_at(
                        Operation::Delete {
                            target: user.user_pubkey(),
                            hashes: vec![format!("u{i}")],
                        },
                        NOW,
                    )
                    .unwrap(),
            );
            if i < 2 {
                requests.push(
                    encoder
                        .encode_at(
                            Operation::Delete {
                                target: group.group_pubkey(),
                                hashes: vec![format!("g{i}")],
                            },
                            NOW,
                        )
                        .unwrap(),
                );
            }
        }

        let batches = BatchRequest::group(requests);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].target, user.user_pubkey());
        assert_eq!(batches[0].len(), MAX_SUBREQUESTS_PER_BATCH);
        assert_eq!(batches[1].target, user.user_pubkey());
        assert_eq!(batches[1].len(), 5);
        assert_eq!(batches[2].target, group.group_pubkey());
        assert_eq!(batches[2].len(), 2);

        let SubRequest::Delete(first) = &batches[0].requests[0] else {
            panic!("expected delete");
        };
        assert_eq!(first.messages, vec!["u0".to_string()]);

        let body: Value = serde_json::from_slice(&batches[2].to_json().unwrap()).unwrap();
        assert_eq!(body["requests"].as_array().unwrap().len(), 2);
        assert_eq!(body["requests"][0]["method"], "delete");
    }

    #[test]
    fn test_network_queries_are_unsigned() {
        let target = Identity::generate().user_pubkey();

        let wire = SubRequest::get_swarm(target.clone()).to_wire().unwrap();
        assert_eq!(wire["method"], "get_swarm");
        assert_eq!(wire["params"], json!({ "pubkey": target.to_hex() }));

        let listing = SubRequest::get_service_nodes(target.clone());
        assert_eq!(listing.target(), &target);
        let wire = listing.to_wire().unwrap();
        assert_eq!(wire["method"], "oxend_request");
        assert_eq!(wire["params"]["endpoint"], "get_service_nodes");
        assert_eq!(wire["params"]["params"]["active_only"], true);
        assert!(wire["params"].get("via").is_none());
    }
}
