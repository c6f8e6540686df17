use crate::error::CryptoError;
use crate::protocol::{OutgoingMessage, RetrievedMessage};
use crate::types::SwarmPubkey;

/// Content recovered from a retrieved message, ready for the acceptance gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedContent {
    pub hash: String,
    pub sender: Option<SwarmPubkey>,
    /// Timestamp carried by the envelope.
    pub envelope_timestamp: u64,
    /// Timestamp covered by the content signature, 0 or `None` when absent.
    pub sig_timestamp: Option<u64>,
    pub is_community: bool,
    pub body: Vec<u8>,
}

/// Envelope sealing and opening, implemented outside this workspace.
///
/// The swarm layer only moves opaque ciphertext; how an envelope is laid out
/// and which keys a namespace uses is entirely the codec's concern.
pub trait EnvelopeCodec: Send + Sync {
    fn seal(&self, message: &OutgoingMessage) -> Result<Vec<u8>, CryptoError>;

    fn open(
        &self,
        swarm: &SwarmPubkey,
        message: &RetrievedMessage,
    ) -> Result<DecryptedContent, CryptoError>;
}
