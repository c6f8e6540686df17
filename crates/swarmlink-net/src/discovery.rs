//! Seed node loading and service node list parsing.
//!
//! Reads a configuration file containing storage nodes (one per line) that
//! populates the directory on startup, and parses the node lists served by
//! storage nodes: the full `service_node_states` listing used for membership
//! refreshes and the `snodes` listing of one swarm.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use swarmlink_shared::error::SwarmError;

use crate::nodes::ServiceNode;

/// Load seed nodes from a configuration file.
///
/// The file format is one node per line: `host:port ed25519_hex x25519_hex`.
/// Empty lines and lines starting with `#` are ignored. Malformed lines are
/// logged and skipped.
///
/// # Example file
///
/// ```text
/// # swarm seed nodes
/// 144.76.164.202:22021 1f000f09a7b07828dcb72af7cd16857050c10c02bd58afb0e38111fb6cda1fef 2d8ba5ca2ad0c7e8f80e4fa2bf0f1c4d2e39cdd0a5a6b3e5b6f1c8b4b5d6e7f8
/// ```
pub fn load_seed_nodes(path: &Path) -> Vec<ServiceNode> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to read seed nodes file"
            );
            return Vec::new();
        }
    };

    let nodes: Vec<ServiceNode> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match parse_seed_line(line) {
            Ok(node) => {
                debug!(node = %node.short(), addr = %node.address, "Loaded seed node");
                Some(node)
            }
            Err(e) => {
                warn!(line = %line, error = %e, "Skipping invalid seed node");
                None
            }
        })
        .collect();

    info!(
        count = nodes.len(),
        path = %path.display(),
        "Loaded seed nodes"
    );

    nodes
}

fn parse_seed_line(line: &str) -> Result<ServiceNode, String> {
    let mut fields = line.split_whitespace();
    let (Some(address), Some(ed), Some(x), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err("expected `host:port ed25519_hex x25519_hex`".into());
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("missing port in {address}"))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(format!("bad address {address}"));
    }

    Ok(ServiceNode {
        address: address.to_string(),
        pubkey_ed25519: parse_key(ed)?,
        pubkey_x25519: parse_key(x)?,
    })
}

fn parse_key(raw: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(raw).map_err(|e| format!("bad key {raw}: {e}"))?;
    <[u8; 32]>::try_from(bytes).map_err(|b| format!("key is {} bytes, expected 32", b.len()))
}

#[derive(Debug, Deserialize)]
struct ServiceNodeState {
    public_ip: String,
    storage_port: u16,
    pubkey_ed25519: String,
    pubkey_x25519: String,
}

#[derive(Debug, Deserialize)]
struct ServiceNodeList {
    service_node_states: Vec<ServiceNodeState>,
}

/// Ports show up as numbers or strings depending on the node version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Port {
    Number(u16),
    Text(String),
}

impl Port {
    fn value(&self) -> Option<u16> {
        match self {
            Port::Number(p) => Some(*p),
            Port::Text(t) => t.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SwarmMember {
    ip: String,
    #[serde(alias = "port")]
    port_https: Port,
    pubkey_ed25519: String,
    pubkey_x25519: String,
}

#[derive(Debug, Deserialize)]
struct SwarmListing {
    snodes: Vec<SwarmMember>,
}

/// Parse a `service_node_states` listing. Entries that are not yet
/// reachable (`0.0.0.0`, port 0) or carry bad keys are skipped.
pub fn parse_service_node_list(json: &[u8]) -> Result<Vec<ServiceNode>, SwarmError> {
    service_nodes_from_value(serde_json::from_slice(json)?)
}

/// [`parse_service_node_list`] over an already decoded body. An
/// `oxend_request` answer wraps the listing in `result`.
pub fn service_nodes_from_value(body: Value) -> Result<Vec<ServiceNode>, SwarmError> {
    let body = match body {
        Value::Object(mut map) if map.contains_key("result") => map.remove("result").unwrap_or_default(),
        other => other,
    };
    let list: ServiceNodeList = serde_json::from_value(body)?;

    let nodes: Vec<ServiceNode> = list
        .service_node_states
        .into_iter()
        .filter_map(|state| to_service_node(&state.public_ip, Some(state.storage_port), &state.pubkey_ed25519, &state.pubkey_x25519))
        .collect();

    info!(count = nodes.len(), "Parsed service node list");
    Ok(nodes)
}

/// Parse the `{"snodes": [..]}` member list of one swarm, as answered to
/// `get_swarm` and carried by a 421 wrong-swarm reply.
pub fn parse_swarm_listing(body: &Value) -> Result<Vec<ServiceNode>, SwarmError> {
    let listing = SwarmListing::deserialize(body)?;
    Ok(listing
        .snodes
        .iter()
        .filter_map(|m| to_service_node(&m.ip, m.port_https.value(), &m.pubkey_ed25519, &m.pubkey_x25519))
        .collect())
}

fn to_service_node(ip: &str, port: Option<u16>, ed25519: &str, x25519: &str) -> Option<ServiceNode> {
    let port = port.unwrap_or(0);
    if ip.is_empty() || ip == "0.0.0.0" || port == 0 {
        debug!(ip = %ip, "Skipping unreachable service node");
        return None;
    }
    match parse_key(ed25519).and_then(|ed| Ok((ed, parse_key(x25519)?))) {
        Ok((pubkey_ed25519, pubkey_x25519)) => Some(ServiceNode {
            address: format!("{ip}:{port}"),
            pubkey_ed25519,
            pubkey_x25519,
        }),
        Err(e) => {
            warn!(ip = %ip, error = %e, "Skipping service node with bad keys");
            None
        }
    }
}
