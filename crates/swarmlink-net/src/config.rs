//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client can start with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use swarmlink_shared::constants::{
    DEFAULT_MAX_DISPATCH_ATTEMPTS, DEFAULT_MEMBERSHIP_REFRESH_SECS,
    DEFAULT_NODE_BLACKLIST_COOLDOWN_SECS, DEFAULT_NODE_FAILURE_THRESHOLD, DEFAULT_PATH_DEPTH,
    DEFAULT_PATH_MAX_AGE_SECS,
};

/// Swarm client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay hops per onion path, guard included.
    /// Env: `SWARM_PATH_DEPTH`
    /// Default: `3`
    pub path_depth: usize,

    /// Dispatch attempts before a swarm is reported unreachable.
    /// Env: `SWARM_MAX_ATTEMPTS`
    /// Default: `3`
    pub max_attempts: usize,

    /// Age after which a cached path is rebuilt.
    /// Env: `SWARM_PATH_MAX_AGE_SECS`
    /// Default: `600`
    pub path_max_age: Duration,

    /// Consecutive failures before a node is blacklisted.
    /// Env: `SWARM_NODE_FAILURE_THRESHOLD`
    /// Default: `3`
    pub node_failure_threshold: u32,

    /// How long a blacklisted node is skipped.
    /// Env: `SWARM_NODE_BLACKLIST_COOLDOWN_SECS`
    /// Default: `300`
    pub node_blacklist_cooldown: Duration,

    /// HTTP timeout of one onion request.
    /// Env: `SWARM_REQUEST_TIMEOUT_SECS`
    /// Default: `30`
    pub request_timeout: Duration,

    /// Interval between polls of watched swarms.
    /// Env: `SWARM_POLL_INTERVAL_SECS`
    /// Default: `10`
    pub poll_interval: Duration,

    /// Interval between service node list refreshes.
    /// Env: `SWARM_MEMBERSHIP_REFRESH_SECS`
    /// Default: `3600`
    pub membership_refresh_interval: Duration,

    /// Seed node file, see [`crate::discovery::load_seed_nodes`].
    /// Env: `SWARM_SEED_NODES`
    /// Default: none
    pub seed_nodes_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            path_depth: DEFAULT_PATH_DEPTH,
            max_attempts: DEFAULT_MAX_DISPATCH_ATTEMPTS,
            path_max_age: Duration::from_secs(DEFAULT_PATH_MAX_AGE_SECS),
            node_failure_threshold: DEFAULT_NODE_FAILURE_THRESHOLD,
            node_blacklist_cooldown: Duration::from_secs(DEFAULT_NODE_BLACKLIST_COOLDOWN_SECS),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            membership_refresh_interval: Duration::from_secs(DEFAULT_MEMBERSHIP_REFRESH_SECS),
            seed_nodes_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_positive::<usize>(&lookup, "SWARM_PATH_DEPTH") {
            config.path_depth = n;
        }
        if let Some(n) = parse_positive::<usize>(&lookup, "SWARM_MAX_ATTEMPTS") {
            config.max_attempts = n;
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "SWARM_PATH_MAX_AGE_SECS") {
            config.path_max_age = Duration::from_secs(secs);
        }
        if let Some(n) = parse_positive::<u32>(&lookup, "SWARM_NODE_FAILURE_THRESHOLD") {
            config.node_failure_threshold = n;
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "SWARM_NODE_BLACKLIST_COOLDOWN_SECS") {
            config.node_blacklist_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "SWARM_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "SWARM_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "SWARM_MEMBERSHIP_REFRESH_SECS") {
            config.membership_refresh_interval = Duration::from_secs(secs);
        }

        if let Some(path) = lookup("SWARM_SEED_NODES") {
            if !path.trim().is_empty() {
                config.seed_nodes_path = Some(PathBuf::from(path.trim()));
            }
        }

        config
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            tracing::warn!(
                key,
                value = %raw,
                "Invalid value, using default"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.path_depth, 3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.path_max_age, Duration::from_secs(600));
        assert!(config.seed_nodes_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SWARM_PATH_DEPTH", "2"),
            ("SWARM_MAX_ATTEMPTS", " 5 "),
            ("SWARM_POLL_INTERVAL_SECS", "1"),
            ("SWARM_NODE_BLACKLIST_COOLDOWN_SECS", "30"),
            ("SWARM_SEED_NODES", "/etc/swarmlink/seeds.txt"),
        ]);
        assert_eq!(config.node_blacklist_cooldown, Duration::from_secs(30));
        assert_eq!(config.membership_refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.path_depth, 2);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.seed_nodes_path, Some(PathBuf::from("/etc/swarmlink/seeds.txt")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("SWARM_PATH_DEPTH", "0"),
            ("SWARM_NODE_FAILURE_THRESHOLD", "lots"),
            ("SWARM_REQUEST_TIMEOUT_SECS", "-4"),
            ("SWARM_SEED_NODES", "  "),
        ]);
        assert_eq!(config, ClientConfig::default());
    }
}
