//! JSON shapes exchanged with storage nodes, plus the locally built
//! outgoing message.
//!
//! Field names follow the storage RPC exactly (`storedAt`, `messagesHashes`,
//! `pubkey_ed25519`), hence the mixed serde renames.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::types::{Namespace, SwarmPubkey};

// ---------------------------------------------------------------------------
// Retrieve
// ---------------------------------------------------------------------------

/// One stored message as returned by a retrieve call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveMessageItem {
    pub hash: String,
    pub expiration: u64,
    /// base64 ciphertext
    pub data: String,
    /// When the node stored the message, not the envelope timestamp.
    pub stored_at: u64,
}

/// Page content of a retrieve result.
///
/// Items are kept as raw JSON so that one malformed entry does not take the
/// whole page down with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrieveMessagesResultsContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub more: bool,
    #[serde(default)]
    pub t: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieveRequestResult {
    pub code: u16,
    pub messages: RetrieveMessagesResultsContent,
    pub namespace: Namespace,
}

/// A retrieved message with its payload decoded and its namespace attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedMessage {
    pub hash: String,
    pub expiration: u64,
    pub data: Vec<u8>,
    pub stored_at: u64,
    pub namespace: Namespace,
}

impl RetrievedMessage {
    pub fn from_item(
        item: RetrieveMessageItem,
        namespace: Namespace,
    ) -> Result<Self, base64::DecodeError> {
        let data = STANDARD.decode(item.data.trim())?;
        Ok(Self {
            hash: item.hash,
            expiration: item.expiration,
            data,
            stored_at: item.stored_at,
            namespace,
        })
    }
}

// ---------------------------------------------------------------------------
// Delete / signed hash lists
// ---------------------------------------------------------------------------

/// Params of a signed request over a list of hashes. Group-targeted
/// requests leave `pubkey_ed25519` out and are signed by the group key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedHashesParams {
    pub pubkey: SwarmPubkey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey_ed25519: Option<String>,
    pub messages: Vec<String>,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// One node's answer to an expire request.
///
/// The signature covers
/// `PUBKEY_HEX || EXPIRY || RMSGs... || UMSGs... || CMSG_EXPs...` where RMSGs
/// are the requested hashes, UMSGs the updated ones and CMSG_EXPs the
/// `HASH || EXPIRY` pairs of `unchanged`, each list ascii-sorted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpireMessageResultItem {
    #[serde(default)]
    pub signature: String,
    /// Expiry actually applied, which may differ from the requested one.
    #[serde(default)]
    pub expiry: u64,
    /// Only present when the request used `extend` or `shorten`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
}

/// Expire results keyed by responding node ed25519 pubkey (hex).
pub type ExpireMessagesResultsContent = BTreeMap<String, ExpireMessageResultItem>;

#[derive(Debug, Clone, Deserialize)]
pub struct ExpireResponseBody {
    pub swarm: ExpireMessagesResultsContent,
}

// ---------------------------------------------------------------------------
// Batch envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubResult {
    pub code: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl SubResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<SubResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreResponseBody {
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionMode {
    SessionMessage = 6,
    ClosedGroupMessage = 7,
}

impl EncryptionMode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            6 => Some(Self::SessionMessage),
            7 => Some(Self::ClosedGroupMessage),
            _ => None,
        }
    }
}

/// A message built locally and waiting to become a store sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub identifier: String,
    pub plaintext: Vec<u8>,
    /// Swarm the message is stored in.
    pub device: SwarmPubkey,
    pub ttl_ms: u64,
    pub encryption: EncryptionMode,
    pub namespace: Namespace,
}

impl OutgoingMessage {
    pub fn new(
        device: SwarmPubkey,
        namespace: Namespace,
        plaintext: Vec<u8>,
        ttl_ms: u64,
        encryption: EncryptionMode,
    ) -> Self {
        Self {
            identifier: uuid::Uuid::new_v4().to_string(),
            plaintext,
            device,
            ttl_ms,
            encryption,
            namespace,
        }
    }
}
