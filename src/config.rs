//! Steward Configuration
//!
//! This module provides configuration structures for the steward
//! cluster node agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main steward configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Coordination store configuration
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Lifecycle configuration
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    #[serde(default = "default_node_id")]
    pub id: String,

    /// Advertised address for operators and peers
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Root namespace under which election and membership keys live
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Session lease time-to-live in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Leadership poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before re-attempting an aborted campaign, in milliseconds
    #[serde(default = "default_campaign_retry_delay_ms")]
    pub campaign_retry_delay_ms: u64,

    /// Maximum campaign re-attempts before escalating to a session failure
    #[serde(default = "default_campaign_retry_max")]
    pub campaign_retry_max: u32,

    /// Delay before restarting an interrupted observation stream, in milliseconds
    #[serde(default = "default_observe_retry_delay_ms")]
    pub observe_retry_delay_ms: u64,

    /// Maximum consecutive observation restarts before escalating
    #[serde(default = "default_observe_retry_max")]
    pub observe_retry_max: u32,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log to file path (optional)
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_node_id() -> String {
    format!("node-{}", uuid::Uuid::new_v4())
}

fn default_namespace() -> String {
    "/steward".to_string()
}

fn default_session_ttl_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_campaign_retry_delay_ms() -> u64 {
    500
}

fn default_campaign_retry_max() -> u32 {
    5
}

fn default_observe_retry_delay_ms() -> u64 {
    250
}

fn default_observe_retry_max() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            campaign_retry_delay_ms: default_campaign_retry_delay_ms(),
            campaign_retry_max: default_campaign_retry_max(),
            observe_retry_delay_ms: default_observe_retry_delay_ms(),
            observe_retry_max: default_observe_retry_max(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl StewardConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StewardConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: StewardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.id.contains('/') {
            return Err(crate::Error::Config(
                "node.id cannot contain '/' (it is used as a key segment)".into(),
            ));
        }

        if self.coordination.namespace.is_empty() {
            return Err(crate::Error::Config(
                "coordination.namespace cannot be empty".into(),
            ));
        }

        if self.coordination.session_ttl_secs == 0 {
            return Err(crate::Error::Config(
                "coordination.session_ttl_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Get the session lease TTL as a Duration
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.coordination.session_ttl_secs)
    }

    /// Get the leadership poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle.poll_interval_ms)
    }

    /// Get the election namespace
    pub fn election_namespace(&self) -> String {
        format!("{}/elections", self.coordination.namespace)
    }

    /// Get the membership namespace
    pub fn member_namespace(&self) -> String {
        format!("{}/members", self.coordination.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "client-1"

[coordination]
namespace = "/simple-ds"
session_ttl_secs = 30

[lifecycle]
poll_interval_ms = 500
"#;

        let config = StewardConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "client-1");
        assert_eq!(config.coordination.session_ttl_secs, 30);
        assert_eq!(config.election_namespace(), "/simple-ds/elections");
        assert_eq!(config.member_namespace(), "/simple-ds/members");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_defaults() {
        let config = StewardConfig::from_str("[node]\nid = \"client-1\"\n").unwrap();
        assert_eq!(config.coordination.session_ttl_secs, 30);
        assert_eq!(config.lifecycle.poll_interval_ms, 1000);
        assert!(config.api.enabled);
    }

    #[test]
    fn test_rejects_slash_in_node_id() {
        let result = StewardConfig::from_str("[node]\nid = \"a/b\"\n");
        assert!(result.is_err());
    }
}
