use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_ONION_LAYER, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Key material for one onion layer, produced by the sender.
pub struct LayerKey {
    /// Ephemeral x25519 public key the hop needs to derive the same key.
    pub ephemeral_public: [u8; 32],
    pub key: SymmetricKey,
}

// BLAKE3 KDF with domain separation over the x25519 shared secret
fn layer_key_from_shared(shared: &[u8; 32]) -> SymmetricKey {
    blake3::derive_key(KDF_CONTEXT_ONION_LAYER, shared)
}

/// Fresh ephemeral DH against a hop's x25519 key.
pub fn derive_layer_key(hop_x25519: &[u8; 32]) -> LayerKey {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&X25519PublicKey::from(*hop_x25519));
    LayerKey {
        ephemeral_public,
        key: layer_key_from_shared(shared.as_bytes()),
    }
}

/// Hop side of [`derive_layer_key`].
pub fn derive_layer_key_for_hop(hop_secret: &StaticSecret, ephemeral_public: &[u8; 32]) -> SymmetricKey {
    let shared = hop_secret.diffie_hellman(&X25519PublicKey::from(*ephemeral_public));
    layer_key_from_shared(shared.as_bytes())
}
