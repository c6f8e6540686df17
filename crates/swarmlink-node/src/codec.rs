//! Pass-through envelope codec.
//!
//! Stores plaintext as-is and treats every retrieved payload as unsigned
//! content stamped at its storage time. Enough to watch a swarm and exercise
//! the client; real envelope encryption plugs in through the same trait.

use swarmlink_shared::envelope::{DecryptedContent, EnvelopeCodec};
use swarmlink_shared::error::CryptoError;
use swarmlink_shared::protocol::{OutgoingMessage, RetrievedMessage};
use swarmlink_shared::types::SwarmPubkey;

pub struct RawCodec;

impl EnvelopeCodec for RawCodec {
    fn seal(&self, message: &OutgoingMessage) -> Result<Vec<u8>, CryptoError> {
        Ok(message.plaintext.clone())
    }

    fn open(
        &self,
        _swarm: &SwarmPubkey,
        message: &RetrievedMessage,
    ) -> Result<DecryptedContent, CryptoError> {
        Ok(DecryptedContent {
            hash: message.hash.clone(),
            sender: None,
            envelope_timestamp: message.stored_at,
            sig_timestamp: None,
            is_community: false,
            body: message.data.clone(),
        })
    }
}
