//! Configuration for taskmesh components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Job definition shared by all nodes and the controller
    pub job: JobConfig,

    /// Node-specific config
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Job definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, the namespace for all coordination-store keys
    pub name: String,

    /// Total number of task slots
    pub num_tasks: u64,
}

impl JobConfig {
    pub fn new(name: impl Into<String>, num_tasks: u64) -> Self {
        Self {
            name: name.into(),
            num_tasks,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(crate::Error::InvalidConfig("job name is required".into()));
        }
        if self.name.contains('/') {
            return Err(crate::Error::InvalidConfig(format!(
                "job name may not contain '/': {}",
                self.name
            )));
        }
        if self.num_tasks == 0 {
            return Err(crate::Error::InvalidConfig(
                "num_tasks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Per-node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bind address for the data-transport HTTP server
    pub bind_addr: SocketAddr,

    /// TTL on the claimed owner record; the lease is refreshed at a third
    /// of this interval
    #[serde(default = "default_owner_ttl")]
    pub owner_ttl_ms: u64,

    /// Standby re-sweep interval when no owner-change event arrives
    #[serde(default = "default_standby_interval")]
    pub standby_interval_ms: u64,
}

fn default_owner_ttl() -> u64 {
    10_000
}
fn default_standby_interval() -> u64 {
    500
}

impl NodeConfig {
    pub fn owner_ttl(&self) -> Duration {
        Duration::from_millis(self.owner_ttl_ms)
    }

    pub fn standby_interval(&self) -> Duration {
        Duration::from_millis(self.standby_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.owner_ttl_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "owner_ttl_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            owner_ttl_ms: default_owner_ttl(),
            standby_interval_ms: default_standby_interval(),
        }
    }
}

/// Runtime configuration for outgoing data requests
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-call timeout on data fetches
    pub request_timeout: Duration,

    /// Retry attempts for a single data request
    pub max_retries: usize,

    /// Delay between retries
    pub retry_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.job.validate()?;
        self.node.validate()?;
        Ok(())
    }
}
