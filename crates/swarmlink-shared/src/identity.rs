use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::IdentityError;
use crate::types::SwarmPubkey;

/// Signing seam consumed by the request encoder.
///
/// The encoder never touches key material directly; anything able to produce
/// an Ed25519 signature (a local keypair, a group admin key, a hardware
/// token) can sit behind this trait.
pub trait RequestSigner: Send + Sync {
    /// Ed25519 public key matching the signatures this signer produces.
    fn ed25519_public(&self) -> [u8; 32];

    fn sign(&self, message: &[u8]) -> Result<Signature, IdentityError>;
}

/// An Ed25519 keypair. Used for the local account and for groups whose
/// admin key we hold.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The account's swarm address: `05` followed by the x25519 form of the
    /// Ed25519 public key.
    pub fn user_pubkey(&self) -> SwarmPubkey {
        let x25519 = self.signing_key.verifying_key().to_montgomery().to_bytes();
        SwarmPubkey::user(x25519)
    }

    /// A group's swarm address is its Ed25519 key behind the `03` prefix.
    pub fn group_pubkey(&self) -> SwarmPubkey {
        SwarmPubkey::group(self.public_key_bytes())
    }
}

impl RequestSigner for Identity {
    fn ed25519_public(&self) -> [u8; 32] {
        self.public_key_bytes()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, IdentityError> {
        Ok(self.signing_key.sign(message))
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::VerificationFailed)
}
