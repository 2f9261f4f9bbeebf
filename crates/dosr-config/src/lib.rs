//! Configuration management for dosr
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (DOSR_* prefix, `__` between section and key)
//! 3. An explicit `--config` file
//! 4. dosr.local.toml (gitignored, local overrides)
//! 5. dosr.toml (git-tracked, project config)
//! 6. ~/.config/dosr/config.toml (user defaults)
//! 7. Built-in defaults (lowest precedence)
//!
//! The startup failover topology lives in a separate text file; see
//! [`TopologyFile`].

use anyhow::Result;
use dosr_types::PeerAddr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;
mod topology;

pub use error::{ConfigError, TopologyError};
pub use loader::ConfigLoader;
pub use paths::Paths;
pub use topology::{TopologyEntry, TopologyFile};

/// Main dosr node configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DosrConfig {
    pub node: NodeConfig,
    pub failover: FailoverConfig,
    pub network: NetworkConfig,
    pub topology: TopologyConfig,
}

/// Where this node listens. Also its identity on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub address: String,
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub failover_timeout_ms: u64,
    pub force_backup_interval_ms: u64,
    pub detect_self_failure: bool,
    /// How often the heartbeat cycle runs.
    pub heartbeat_interval_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failover_timeout_ms: 5000,
            force_backup_interval_ms: 10_000,
            detect_self_failure: true,
            heartbeat_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub max_connections: usize,
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            read_buffer_size: 4096,
            max_connections: 1024,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub file: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("failover.txt"),
        }
    }
}

impl DosrConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// This node's listening address.
    pub fn local_addr(&self) -> PeerAddr {
        PeerAddr::new(self.node.address.clone(), self.node.port)
    }

    pub fn failover_timeout(&self) -> Duration {
        Duration::from_millis(self.failover.failover_timeout_ms)
    }

    pub fn force_backup_interval(&self) -> Duration {
        Duration::from_millis(self.failover.force_backup_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.failover.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.topology.file.is_relative() {
            self.topology.file = base.join(&self.topology.file);
        }
    }

    /// Check values that would make the node misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if !self.local_addr().is_wire_safe() {
            return fail("node.address must be non-empty and contain no whitespace");
        }
        if self.node.port == 0 {
            return fail("node.port must be non-zero");
        }
        if self.failover.failover_timeout_ms == 0 {
            return fail("failover.failover_timeout_ms must be non-zero");
        }
        if self.failover.force_backup_interval_ms == 0 {
            return fail("failover.force_backup_interval_ms must be non-zero");
        }
        if self.failover.heartbeat_interval_ms == 0 {
            return fail("failover.heartbeat_interval_ms must be non-zero");
        }
        if self.failover.heartbeat_interval_ms > self.failover.failover_timeout_ms {
            return fail("failover.heartbeat_interval_ms must not exceed failover_timeout_ms");
        }
        if self.network.connect_timeout_ms == 0 {
            return fail("network.connect_timeout_ms must be non-zero");
        }
        if self.network.read_buffer_size == 0 || self.network.max_frame_size == 0 {
            return fail("network buffer sizes must be non-zero");
        }
        if self.network.max_connections == 0 {
            return fail("network.max_connections must be non-zero");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
