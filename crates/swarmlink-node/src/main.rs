//! # swarmlink-node
//!
//! Headless swarm client for one account.
//!
//! This binary:
//! - loads seed storage nodes and builds onion paths over them
//! - refreshes the service node list from the network on an interval
//! - watches the account's own namespaces on the poll interval
//! - logs every retrieved message and accepted content

mod codec;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swarmlink_net::{
    load_seed_nodes, spawn_poller, ClientConfig, ExpiryCoordinator, HttpTransport, NodeDirectory,
    PathBuilder, PollerCommand, PollerContext, PollerNotification, RequestEncoder, SwarmClient,
};
use swarmlink_shared::{Identity, Namespace};

use crate::codec::RawCodec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,swarmlink_net=debug")),
        )
        .init();

    info!("Starting swarmlink node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration and identity
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let identity = load_identity()?;
    let account = identity.user_pubkey();
    info!(account = %account, "Using account");

    // -----------------------------------------------------------------------
    // 3. Node directory, paths and transport
    // -----------------------------------------------------------------------
    let directory = NodeDirectory::new(config.node_failure_threshold)
        .with_blacklist_cooldown(config.node_blacklist_cooldown);
    match &config.seed_nodes_path {
        Some(path) => {
            directory.refresh_membership(load_seed_nodes(path)).await;
        }
        None => warn!("SWARM_SEED_NODES not set"),
    }
    if directory.is_empty().await {
        warn!("No storage nodes known, every request will fail until membership is refreshed");
    }

    let paths = Arc::new(PathBuilder::new(
        directory,
        config.path_depth,
        config.path_max_age,
    ));
    let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
    let client = Arc::new(SwarmClient::new(paths, transport, config.max_attempts));

    // -----------------------------------------------------------------------
    // 4. Spawn the poller and watch our own swarm
    // -----------------------------------------------------------------------
    let (cmd_tx, mut notif_rx) = spawn_poller(PollerContext {
        client,
        encoder: Arc::new(RequestEncoder::new(account.clone(), Arc::new(identity))),
        codec: Arc::new(RawCodec),
        expiry: Arc::new(Mutex::new(ExpiryCoordinator::new())),
        poll_interval: config.poll_interval,
        membership_refresh_interval: config.membership_refresh_interval,
    });

    // Seeds only bootstrap; the live list comes from the network
    cmd_tx
        .send(PollerCommand::RefreshNodes)
        .await
        .context("poller stopped before start")?;
    cmd_tx
        .send(PollerCommand::Watch {
            target: account,
            namespaces: Namespace::user_polled(),
        })
        .await
        .context("poller stopped before start")?;

    // -----------------------------------------------------------------------
    // 5. Log notifications until Ctrl-C
    // -----------------------------------------------------------------------
    loop {
        tokio::select! {
            notification = notif_rx.recv() => {
                match notification {
                    Some(n) => log_notification(n),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = cmd_tx.send(PollerCommand::Shutdown).await;
                break;
            }
        }
    }

    Ok(())
}

/// `SWARMLINK_IDENTITY_SECRET` (hex ed25519 seed), or a throwaway identity.
fn load_identity() -> anyhow::Result<Identity> {
    match std::env::var("SWARMLINK_IDENTITY_SECRET") {
        Ok(raw) => {
            let bytes = hex::decode(raw.trim()).context("SWARMLINK_IDENTITY_SECRET is not hex")?;
            let secret: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("SWARMLINK_IDENTITY_SECRET must be 32 bytes"))?;
            Ok(Identity::from_secret_bytes(&secret))
        }
        Err(_) => {
            warn!("SWARMLINK_IDENTITY_SECRET not set, using an ephemeral identity");
            Ok(Identity::generate())
        }
    }
}

fn log_notification(notification: PollerNotification) {
    match notification {
        PollerNotification::MessagesRetrieved {
            target,
            namespace,
            hashes,
        } => {
            info!(swarm = %target.short(), namespace = %namespace, count = hashes.len(), "Messages retrieved");
        }
        PollerNotification::ContentAccepted {
            namespace, content, ..
        } => {
            info!(
                namespace = %namespace,
                hash = %content.hash,
                bytes = content.body.len(),
                "Content accepted"
            );
        }
        PollerNotification::PollCompleted {
            target,
            new_messages,
        } => {
            info!(swarm = %target.short(), new_messages, "Poll completed");
        }
        PollerNotification::PollFailed { target, error } => {
            warn!(swarm = %target.short(), error = %error, "Poll failed");
        }
        PollerNotification::MessageStored { identifier, hash } => {
            info!(id = %identifier, hash = ?hash, "Message stored");
        }
        PollerNotification::SendFailed { identifier, error } => {
            warn!(id = %identifier, error = %error, "Send failed");
        }
        PollerNotification::ExpiryUpdated { target, summary } => {
            info!(
                swarm = %target.short(),
                applied = summary.applied.len(),
                rejected = summary.rejected.len(),
                failed = summary.failed.len(),
                "Expiry updated"
            );
        }
        PollerNotification::ExpiryFailed { target, error } => {
            warn!(swarm = %target.short(), error = %error, "Expiry update failed");
        }
        PollerNotification::NodesRefreshed { count } => {
            info!(count, "Service node list refreshed");
        }
        PollerNotification::NodeRefreshFailed { error } => {
            warn!(error = %error, "Service node refresh failed");
        }
    }
}
