//! Delivery of onion payloads to a guard node.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use swarmlink_shared::constants::ONION_ENDPOINT;
use swarmlink_shared::error::TransportError;

use crate::nodes::ServiceNode;

const NEXT_NODE_NOT_FOUND: &str = "Next node not found: ";

/// Seam between the swarm client and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `payload` to `guard` and return the raw (still encrypted) answer.
    async fn send_onion(&self, guard: &ServiceNode, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// HTTPS transport against the storage nodes' onion endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        // Storage nodes serve self-signed certificates; the onion layers
        // carry the actual authentication.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_onion(&self, guard: &ServiceNode, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let url = format!("https://{}{}", guard.address, ONION_ENDPOINT);
        debug!(guard = %guard.short(), bytes = payload.len(), "Sending onion request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status == 200 {
            return Ok(body.to_vec());
        }

        let err = classify_failure(status, &body);
        warn!(guard = %guard.short(), status, error = %err, "Onion request rejected");
        Err(err)
    }
}

/// Map a non-200 guard answer to a transport error. Relays answer 502/504
/// with `Next node not found: <ed25519 hex>` when the following hop is gone.
pub fn classify_failure(status: u16, body: &[u8]) -> TransportError {
    if matches!(status, 502 | 504) {
        let text = String::from_utf8_lossy(body);
        if let Some(rest) = text.trim().strip_prefix(NEXT_NODE_NOT_FOUND) {
            if let Some(key) = hex::decode(rest.trim())
                .ok()
                .and_then(|b| <[u8; 32]>::try_from(b).ok())
            {
                return TransportError::HopUnreachable(key);
            }
        }
    }
    TransportError::Status(status)
}
