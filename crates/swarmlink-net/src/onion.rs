//! Layered onion envelopes.
//!
//! Every hop receives `ephemeral_x25519 (32 bytes) || ciphertext`. Decrypting
//! reveals either the next hop plus a smaller envelope, or (at the
//! destination) the request body. The destination answers with the body
//! encrypted under its own layer key; relays pass the answer back untouched.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;

use swarmlink_shared::crypto::{self, derive_layer_key, derive_layer_key_for_hop, SymmetricKey};
use swarmlink_shared::error::{CryptoError, SwarmError};

use crate::nodes::ServiceNode;
use crate::path::{PathHop, SwarmPath};

const EPHEMERAL_KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LayerContent {
    Relay {
        /// ed25519 hex of the hop this envelope is forwarded to
        next: String,
        payload: String,
    },
    Destination {
        body: String,
    },
}

/// A fully wrapped request, ready to hand to the guard.
pub struct OnionRequest {
    pub guard: PathHop,
    pub payload: Vec<u8>,
    response_key: SymmetricKey,
}

impl OnionRequest {
    /// Decrypt the destination's answer.
    pub fn open_response(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        crypto::decrypt(&self.response_key, data)
    }
}

fn seal_layer(hop_x25519: &[u8; 32], content: &LayerContent) -> Result<(Vec<u8>, SymmetricKey), SwarmError> {
    let layer_key = derive_layer_key(hop_x25519);
    let plaintext = serde_json::to_vec(content)?;
    let ciphertext = crypto::encrypt(&layer_key.key, &plaintext)?;

    let mut blob = Vec::with_capacity(EPHEMERAL_KEY_LEN + ciphertext.len());
    blob.extend_from_slice(&layer_key.ephemeral_public);
    blob.extend_from_slice(&ciphertext);
    Ok((blob, layer_key.key))
}

/// Wrap `body` for `destination`, then once per hop from the last relay
/// back to the guard.
pub fn build_onion(
    path: &SwarmPath,
    destination: &ServiceNode,
    body: &[u8],
) -> Result<OnionRequest, SwarmError> {
    let guard = path
        .guard()
        .cloned()
        .ok_or_else(|| SwarmError::Protocol("empty onion path".into()))?;

    let (mut blob, response_key) = seal_layer(
        &destination.pubkey_x25519,
        &LayerContent::Destination {
            body: STANDARD.encode(body),
        },
    )?;
    let mut next = destination.ed25519_hex();

    for hop in path.hops().iter().rev() {
        let (wrapped, _) = seal_layer(
            &hop.node.pubkey_x25519,
            &LayerContent::Relay {
                next,
                payload: STANDARD.encode(&blob),
            },
        )?;
        blob = wrapped;
        next = hop.node.ed25519_hex();
    }

    Ok(OnionRequest {
        guard,
        payload: blob,
        response_key,
    })
}

/// What a hop learns after removing its layer.
#[derive(Debug)]
pub enum Peeled {
    Relay { next: [u8; 32], payload: Vec<u8> },
    Destination { body: Vec<u8>, response_key: SymmetricKey },
}

/// Remove one layer with the hop's x25519 secret.
pub fn peel_layer(hop_secret: &StaticSecret, blob: &[u8]) -> Result<Peeled, SwarmError> {
    if blob.len() <= EPHEMERAL_KEY_LEN {
        return Err(CryptoError::DecryptionFailed.into());
    }
    let (ephemeral, ciphertext) = blob.split_at(EPHEMERAL_KEY_LEN);
    let mut ephemeral_public = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral_public.copy_from_slice(ephemeral);

    let key = derive_layer_key_for_hop(hop_secret, &ephemeral_public);
    let plaintext = crypto::decrypt(&key, ciphertext)?;

    match serde_json::from_slice::<LayerContent>(&plaintext)? {
        LayerContent::Relay { next, payload } => {
            let next_bytes = hex::decode(&next)
                .ok()
                .filter(|b| b.len() == 32)
                .ok_or_else(|| SwarmError::Protocol(format!("bad next hop {next}")))?;
            let mut next = [0u8; 32];
            next.copy_from_slice(&next_bytes);
            let payload = STANDARD
                .decode(payload)
                .map_err(|e| SwarmError::Serialization(e.to_string()))?;
            Ok(Peeled::Relay { next, payload })
        }
        LayerContent::Destination { body } => {
            let body = STANDARD
                .decode(body)
                .map_err(|e| SwarmError::Serialization(e.to_string()))?;
            Ok(Peeled::Destination {
                body,
                response_key: key,
            })
        }
    }
}
