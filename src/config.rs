//! Per-node configuration.
//!
//! Loaded from a TOML file and merged with CLI flags in `main`. The `peers`
//! table is required to be byte-for-byte identical across every node in the
//! cluster — each entry carries both the RAFT transport endpoint and the
//! HTTP endpoint clients reach it on, so that a follower can build a
//! redirect `Location` for any peer, including itself.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{ELECTION_TIMEOUT_MAX_MS, ELECTION_TIMEOUT_MIN_MS, HEARTBEAT_INTERVAL_MS};
use crate::error::ConfigError;

/// A single cluster member as every node sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    pub id: String,
    pub raft_addr: SocketAddr,
    pub http_addr: SocketAddr,
}

/// Public load-balancer identity used to build redirect locations when the
/// cluster sits behind one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicEndpoint {
    pub host: String,
    pub scheme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub peers: Vec<PeerConfig>,

    #[serde(default)]
    pub public: Option<PublicEndpoint>,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_election_timeout_min_ms() -> u64 {
    ELECTION_TIMEOUT_MIN_MS
}
fn default_election_timeout_max_ms() -> u64 {
    ELECTION_TIMEOUT_MAX_MS
}
fn default_heartbeat_interval_ms() -> u64 {
    HEARTBEAT_INTERVAL_MS
}

impl NodeConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file can't be read or parsed, or if
    /// `node_id` isn't among `peers`.
    pub fn load(path: &Path) -> Result<NodeConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: NodeConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.me().is_none() {
            return Err(ConfigError::SelfNotInPeers {
                node_id: self.node_id.clone(),
            });
        }
        Ok(())
    }

    /// This node's own entry in `peers`.
    pub fn me(&self) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| p.id == self.node_id)
    }

    /// Every other node in the cluster.
    pub fn others(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers.iter().filter(move |p| p.id != self.node_id)
    }

    /// Full cluster size, including self.
    pub fn cluster_size(&self) -> usize {
        self.peers.len()
    }

    /// Looks up a peer's HTTP address by id — used to build redirect
    /// `Location` headers in local mode.
    pub fn http_addr_of(&self, id: &str) -> Option<SocketAddr> {
        self.peers.iter().find(|p| p.id == id).map(|p| p.http_addr)
    }

    pub fn election_timeout_range(&self) -> (u64, u64) {
        (self.election_timeout_min_ms, self.election_timeout_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            node_id = "n0"

            [[peers]]
            id = "n0"
            raft_addr = "127.0.0.1:9000"
            http_addr = "127.0.0.1:8000"

            [[peers]]
            id = "n1"
            raft_addr = "127.0.0.1:9001"
            http_addr = "127.0.0.1:8001"
        "#
    }

    #[test]
    fn parses_defaults() {
        let config: NodeConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.election_timeout_min_ms, ELECTION_TIMEOUT_MIN_MS);
        assert_eq!(config.election_timeout_max_ms, ELECTION_TIMEOUT_MAX_MS);
        assert_eq!(config.heartbeat_interval_ms, HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.cluster_size(), 2);
    }

    #[test]
    fn me_and_others() {
        let config: NodeConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.me().unwrap().id, "n0");
        let others: Vec<_> = config.others().map(|p| p.id.clone()).collect();
        assert_eq!(others, vec!["n1".to_string()]);
    }

    #[test]
    fn rejects_missing_self() {
        let mut config: NodeConfig = toml::from_str(sample_toml()).unwrap();
        config.node_id = "ghost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_addr_lookup() {
        let config: NodeConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(
            config.http_addr_of("n1"),
            Some("127.0.0.1:8001".parse().unwrap())
        );
        assert_eq!(config.http_addr_of("missing"), None);
    }
}
