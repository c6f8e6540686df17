/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Hex prefix of a user (individual account) pubkey
pub const USER_PUBKEY_PREFIX: &str = "05";

/// Hex prefix of a group pubkey
pub const GROUP_PUBKEY_PREFIX: &str = "03";

/// Number of relay hops in an onion path (guard included)
pub const DEFAULT_PATH_DEPTH: usize = 3;

/// Dispatch attempts before a swarm is considered unreachable
pub const DEFAULT_MAX_DISPATCH_ATTEMPTS: usize = 3;

/// Cached onion paths are rebuilt after this many seconds
pub const DEFAULT_PATH_MAX_AGE_SECS: u64 = 600;

/// Consecutive failures before a node is blacklisted
pub const DEFAULT_NODE_FAILURE_THRESHOLD: u32 = 3;

/// Seconds a blacklisted node is kept out of path selection
pub const DEFAULT_NODE_BLACKLIST_COOLDOWN_SECS: u64 = 300;

/// Seconds between service node list refreshes
pub const DEFAULT_MEMBERSHIP_REFRESH_SECS: u64 = 3600;

/// Storage nodes reject batches with more sub-requests than this
pub const MAX_SUBREQUESTS_PER_BATCH: usize = 20;

/// Onion endpoint exposed by every storage node
pub const ONION_ENDPOINT: &str = "/onion_req/v2";

pub const MINUTE_MS: u64 = 60 * 1000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Community servers may disagree with the signed timestamp by strictly less than this
pub const COMMUNITY_TIMESTAMP_TOLERANCE_MS: u64 = 6 * HOUR_MS;

/// Default time-to-live of typing indicators
pub const TTL_TYPING_MS: u64 = 20 * 1000;

/// Storage nodes refuse anything longer than 30 days
pub const TTL_MAX_MS: u64 = 30 * DAY_MS;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_ONION_LAYER: &str = "swarmlink-onion-layer-v1";
