//! Boot configuration for the OPNet node.
//!
//! One record, read once at startup and passed by reference into
//! constructors. Nothing in the workspace reads configuration from
//! globals or the environment after boot.

use std::path::Path;

use opnet_params::NetworkKind;
use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors. These map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Base-chain RPC client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    #[serde(default = "default_rpc_threads")]
    pub threads: u16,
    #[serde(default = "default_rpc_max_concurrent")]
    pub max_concurrent_requests: u16,
}

impl RpcConfig {
    /// Full URL the RPC client connects to.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Tip-notification subscription settings. The subscription is a hint
/// only; chain info polling stays the ground truth.
#[derive(Debug, Clone, Deserialize)]
pub struct ZeromqConfig {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_zmq_topic")]
    pub topic: String,
}

/// Indexer scheduling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    #[serde(default = "default_block_query_interval_ms")]
    pub block_query_interval_ms: u64,

    #[serde(default = "default_max_prefetch_blocks")]
    pub max_prefetch_blocks: usize,

    /// When set, wipe derived state from `reindex_from_block` and re-drive.
    #[serde(default)]
    pub reindex: bool,

    pub reindex_from_block: Option<u64>,

    /// First height the indexer considers OPNet-enabled.
    pub enabled_at_block: u64,

    /// Deepest reorg the node is willing to rewind through. Anything
    /// deeper is treated as corruption.
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u64,
}

/// Storage backend settings. For the embedded backend the connection URI
/// is a filesystem path; `name` becomes a subdirectory.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub connection_uri: String,
    pub name: String,
}

/// Gossip settings.
#[derive(Debug, Clone, Deserialize)]
pub struct P2pConfig {
    pub listen: String,
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    #[serde(default)]
    pub is_bootstrap_node: bool,
}

/// API worker fan-out.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    #[serde(default = "default_api_threads")]
    pub threads: u16,
}

/// The full node configuration record.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub network: NetworkKind,
    pub rpc: RpcConfig,
    pub zeromq: Option<ZeromqConfig>,
    pub indexer: IndexerConfig,
    pub database: DatabaseConfig,
    pub p2p: P2pConfig,
    pub api: ApiConfig,

    #[serde(default = "default_rpc_workers")]
    pub rpc_workers: u16,

    /// 0 = errors only … 5 = trace.
    #[serde(default = "default_debug_level")]
    pub debug_level: u8,

    /// Enables extra assertions on hot paths.
    #[serde(default)]
    pub dev_mode: bool,
}

impl NodeConfig {
    /// Loads and parses a TOML config file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

fn default_rpc_threads() -> u16 {
    4
}

fn default_rpc_max_concurrent() -> u16 {
    16
}

fn default_zmq_topic() -> String {
    "hashblock".to_string()
}

fn default_block_query_interval_ms() -> u64 {
    2_000
}

fn default_max_prefetch_blocks() -> usize {
    10
}

fn default_max_reorg_depth() -> u64 {
    100
}

fn default_api_threads() -> u16 {
    2
}

fn default_rpc_workers() -> u16 {
    2
}

fn default_debug_level() -> u8 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        network = "regtest"
        debug_level = 4

        [rpc]
        host = "127.0.0.1"
        port = 18443
        user = "rpcuser"
        pass = "rpcpass"

        [zeromq]
        address = "127.0.0.1"
        port = 28332
        topic = "hashblock"

        [indexer]
        enabled_at_block = 100

        [database]
        connection_uri = "/var/lib/opnet"
        name = "regtest"

        [p2p]
        listen = "0.0.0.0:9800"
        bootstrap_nodes = ["10.0.0.1:9800"]

        [api]
        port = 9001
    "#;

    #[test]
    fn test_parse_sample_config() {
        let cfg: NodeConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.network, NetworkKind::Regtest);
        assert_eq!(cfg.rpc.url(), "http://127.0.0.1:18443");
        assert_eq!(cfg.indexer.enabled_at_block, 100);
        assert_eq!(cfg.indexer.max_prefetch_blocks, 10);
        assert_eq!(cfg.indexer.max_reorg_depth, 100);
        assert!(!cfg.indexer.reindex);
        assert_eq!(cfg.debug_level, 4);
        assert!(!cfg.dev_mode);
    }

    #[test]
    fn test_zeromq_is_optional() {
        let trimmed = SAMPLE.replace("[zeromq]", "[zeromq_disabled]");
        let cfg: NodeConfig = toml::from_str(&trimmed).unwrap();
        assert!(cfg.zeromq.is_none());
    }
}
