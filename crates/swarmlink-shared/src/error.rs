use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("No viable nodes: need {required}, have {available}")]
    NoViableNodes { required: usize, available: usize },

    #[error("Swarm unreachable after {attempts} attempts")]
    SwarmUnreachable { attempts: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Invalid signature on node response")]
    InvalidSignature,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        SwarmError::Serialization(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network failure: {0}")]
    Network(String),

    /// A relay reported that the next hop could not be reached.
    #[error("Hop unreachable: {}", hex::encode(.0))]
    HopUnreachable([u8; 32]),

    #[error("Unexpected status {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PubkeyError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Expected 66 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("Unknown pubkey prefix {0}")]
    UnknownPrefix(String),
}
