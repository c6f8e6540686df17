// Types, crypto and wire shapes shared by the swarm client crates.

pub mod acceptance;
pub mod constants;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use acceptance::{should_process_content_message, SigTimestamp};
pub use envelope::{DecryptedContent, EnvelopeCodec};
pub use error::{CryptoError, IdentityError, PubkeyError, SwarmError, TransportError};
pub use identity::{Identity, RequestSigner};
pub use types::{Namespace, PubkeyKind, SwarmPubkey};
