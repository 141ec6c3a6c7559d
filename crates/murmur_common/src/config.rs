use serde::{Deserialize, Serialize};

/// Top-level node configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MurmurConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Client line-protocol listen address.
    pub client_listen_addr: String,
    /// Peer wire-protocol listen address.
    pub peer_listen_addr: String,
    /// Human-readable node name; must be unique within the cluster.
    pub node_name: String,
    /// Seed peer to join, as `name=host:port`. Empty = start a new cluster.
    #[serde(default)]
    pub join: String,
    /// Max concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Memtable capacity in bytes. Inserts that would cross this
    /// boundary are rejected.
    #[serde(default = "default_max_table_size")]
    pub max_table_size: usize,
    /// Block compression for entry keys and values.
    #[serde(default)]
    pub compression: CompressionType,
}

/// Compression applied independently to entry keys and values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
}

/// Knobs for the SWIM membership loops. Intervals are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_failure_detection_interval_ms")]
    pub failure_detection_interval_ms: u64,
    /// Peers asked to indirectly probe a suspect.
    #[serde(default = "default_subgroup_size")]
    pub failure_detection_subgroup_size: usize,
    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,
    /// Peers gossiped with per round, sampled without replacement.
    #[serde(default = "default_subgroup_size")]
    pub gossip_subgroup_size: usize,
    /// Freshly-joined peers are left alone for this long before they
    /// are probed or gossiped with.
    #[serde(default = "default_startup_grace_period_ms")]
    pub startup_grace_period_ms: u64,
    /// Fixed backoff between bootstrap attempts.
    #[serde(default = "default_bootstrap_backoff_ms")]
    pub bootstrap_backoff_ms: u64,
}

fn default_max_connections() -> usize {
    100
}

fn default_max_table_size() -> usize {
    128 << 20
}

fn default_failure_detection_interval_ms() -> u64 {
    500
}

fn default_gossip_interval_ms() -> u64 {
    200
}

fn default_subgroup_size() -> usize {
    3
}

fn default_startup_grace_period_ms() -> u64 {
    2_000
}

fn default_bootstrap_backoff_ms() -> u64 {
    1_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_listen_addr: "127.0.0.1:1337".to_string(),
            peer_listen_addr: "127.0.0.1:1338".to_string(),
            node_name: "murmur-0".to_string(),
            join: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_table_size: default_max_table_size(),
            compression: CompressionType::None,
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            failure_detection_interval_ms: default_failure_detection_interval_ms(),
            failure_detection_subgroup_size: default_subgroup_size(),
            gossip_interval_ms: default_gossip_interval_ms(),
            gossip_subgroup_size: default_subgroup_size(),
            startup_grace_period_ms: default_startup_grace_period_ms(),
            bootstrap_backoff_ms: default_bootstrap_backoff_ms(),
        }
    }
}

impl MurmurConfig {
    /// Validate cross-field invariants before the node starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.node_name.is_empty() {
            return Err("server.node_name must not be empty".into());
        }
        if self.server.node_name.contains('=') {
            return Err("server.node_name must not contain '='".into());
        }
        if !self.server.join.is_empty() && !self.server.join.contains('=') {
            return Err("server.join must have the form name=host:port".into());
        }
        if self.storage.max_table_size == 0 {
            return Err("storage.max_table_size must be >= 1".into());
        }
        if self.membership.failure_detection_subgroup_size == 0 {
            return Err("membership.failure_detection_subgroup_size must be >= 1".into());
        }
        if self.membership.gossip_subgroup_size == 0 {
            return Err("membership.gossip_subgroup_size must be >= 1".into());
        }
        if self.membership.failure_detection_interval_ms == 0
            || self.membership.gossip_interval_ms == 0
        {
            return Err("membership intervals must be >= 1ms".into());
        }
        Ok(())
    }
}
