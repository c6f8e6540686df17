use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_PUBKEY_PREFIX, USER_PUBKEY_PREFIX};
use crate::error::PubkeyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PubkeyKind {
    /// Individual account, authorised by its own device key.
    User,
    /// Group swarm, authorised by the group key or a subaccount token.
    Group,
}

impl PubkeyKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            PubkeyKind::User => USER_PUBKEY_PREFIX,
            PubkeyKind::Group => GROUP_PUBKEY_PREFIX,
        }
    }
}

// Swarm address = kind prefix + 32 key bytes. Serialized as 66 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SwarmPubkey {
    kind: PubkeyKind,
    key: [u8; 32],
}

impl SwarmPubkey {
    pub fn user(key: [u8; 32]) -> Self {
        Self {
            kind: PubkeyKind::User,
            key,
        }
    }

    pub fn group(key: [u8; 32]) -> Self {
        Self {
            kind: PubkeyKind::Group,
            key,
        }
    }

    pub fn kind(&self) -> PubkeyKind {
        self.kind
    }

    pub fn is_group(&self) -> bool {
        self.kind == PubkeyKind::Group
    }

    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn to_hex(&self) -> String {
        format!("{}{}", self.kind.prefix(), hex::encode(self.key))
    }

    pub fn from_hex(s: &str) -> Result<Self, PubkeyError> {
        let s = s.trim();
        if !s.is_ascii() {
            return Err(PubkeyError::InvalidHex(s.to_string()));
        }
        if s.len() != 66 {
            return Err(PubkeyError::InvalidLength(s.len()));
        }
        let (prefix, body) = s.split_at(2);
        let kind = match prefix {
            USER_PUBKEY_PREFIX => PubkeyKind::User,
            GROUP_PUBKEY_PREFIX => PubkeyKind::Group,
            other => return Err(PubkeyError::UnknownPrefix(other.to_string())),
        };
        let bytes = hex::decode(body).map_err(|e| PubkeyError::InvalidHex(e.to_string()))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { kind, key })
    }

    pub fn short(&self) -> String {
        self.to_hex()[..10].to_string()
    }
}

impl std::fmt::Display for SwarmPubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for SwarmPubkey {
    type Error = PubkeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<SwarmPubkey> for String {
    fn from(pk: SwarmPubkey) -> Self {
        pk.to_hex()
    }
}

/// Storage partition inside one pubkey's swarm. The namespace decides which
/// keys encrypt and authenticate what is stored under it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub i16);

impl Namespace {
    pub const DEFAULT: Namespace = Namespace(0);
    pub const USER_PROFILE: Namespace = Namespace(2);
    pub const USER_CONTACTS: Namespace = Namespace(3);
    pub const CONVO_INFO_VOLATILE: Namespace = Namespace(4);
    pub const USER_GROUPS: Namespace = Namespace(5);
    pub const LEGACY_CLOSED_GROUP: Namespace = Namespace(-10);
    pub const GROUP_MESSAGES: Namespace = Namespace(11);
    pub const GROUP_KEYS: Namespace = Namespace(12);
    pub const GROUP_INFO: Namespace = Namespace(13);
    pub const GROUP_MEMBERS: Namespace = Namespace(14);
    pub const GROUP_REVOKED_RETRIEVABLE: Namespace = Namespace(21);

    pub fn is_user_config(&self) -> bool {
        matches!(self.0, 2..=5)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.0, 11..=14 | 21)
    }

    /// Namespaces the local account polls in its own swarm.
    pub fn user_polled() -> Vec<Namespace> {
        vec![
            Self::DEFAULT,
            Self::USER_PROFILE,
            Self::USER_CONTACTS,
            Self::CONVO_INFO_VOLATILE,
            Self::USER_GROUPS,
        ]
    }

    /// Namespaces polled in a group swarm.
    pub fn group_polled() -> Vec<Namespace> {
        vec![
            Self::GROUP_MESSAGES,
            Self::GROUP_KEYS,
            Self::GROUP_INFO,
            Self::GROUP_MEMBERS,
            Self::GROUP_REVOKED_RETRIEVABLE,
        ]
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the Unix epoch, the unit of every swarm timestamp.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
