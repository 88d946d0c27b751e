//! Configuration management for Tollgate.

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::ratelimit::{FailureMode, PolicyConfig, PolicyRegistry};

/// Environment variable prefix; nested keys are separated by `__`,
/// e.g. `TOLLGATE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Entry store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Behavior when the entry store fails
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Policies added to, or overriding, the built-in ones
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Bearer token for the admin routes; unset closes them
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_token: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 3000))
}

/// Entry store selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-process map; state is per process and lost on restart
    Memory {
        /// How often expired entries are swept, in seconds
        #[serde(default = "default_sweep_interval")]
        sweep_interval_secs: u64,
    },
    /// Shared Redis instance
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379`
        url: String,
        /// Prefix prepended to every key
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        /// Per-command timeout in milliseconds
        #[serde(default = "default_response_timeout")]
        response_timeout_ms: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    120
}

fn default_key_prefix() -> String {
    "tollgate:".to_string()
}

fn default_response_timeout() -> u64 {
    1000
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path));
        }
        Self::from_builder(builder.add_source(environment()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_builder(config::Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: TollgateConfig = builder.build()?.try_deserialize()?;
        // Surface invalid policies at startup rather than at request time.
        config.policy_registry()?;
        Ok(config)
    }

    /// The built-in policies merged with the configured ones.
    pub fn policy_registry(&self) -> Result<PolicyRegistry> {
        let mut registry = PolicyRegistry::with_defaults();
        registry.extend(self.policies.clone())?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TollgateError;

    fn from_yaml_and_env(yaml: &str, vars: config::Map<String, String>) -> Result<TollgateConfig> {
        TollgateConfig::from_builder(
            config::Config::builder()
                .add_source(File::from_str(yaml, FileFormat::Yaml))
                .add_source(environment().source(Some(vars))),
        )
    }

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.store, StoreConfig::Memory { sweep_interval_secs: 120 });
        assert_eq!(config.failure_mode, FailureMode::Propagate);
        assert_eq!(config.policy_registry().unwrap().len(), 7);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = TollgateConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TollgateConfig::default());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:8080"
store:
  backend: redis
  url: "redis://cache:6379"
failure_mode: fail_open
policies:
  api_general:
    window_ms: 1000
    max_requests: 2
  reports:
    window_ms: 30000
    max_requests: 10
    message: Too many report requests.
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(
            config.store,
            StoreConfig::Redis {
                url: "redis://cache:6379".to_string(),
                key_prefix: "tollgate:".to_string(),
                response_timeout_ms: 1000,
            }
        );
        assert_eq!(config.failure_mode, FailureMode::FailOpen);

        let registry = config.policy_registry().unwrap();
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.get("api_general").unwrap().max_requests(), 2);
        assert_eq!(registry.get("reports").unwrap().message(), "Too many report requests.");
    }

    #[test]
    fn test_memory_store_interval() {
        let yaml = r#"
store:
  backend: memory
  sweep_interval_secs: 5
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store, StoreConfig::Memory { sweep_interval_secs: 5 });
    }

    #[test]
    fn test_environment_overrides_file() {
        let yaml = r#"
server:
  listen_addr: "127.0.0.1:4000"
store:
  backend: memory
policies:
  api_general:
    window_ms: 1000
    max_requests: 50
"#;
        let vars = [
            ("TOLLGATE__SERVER__LISTEN_ADDR", "0.0.0.0:9000"),
            ("TOLLGATE__SERVER__ADMIN_TOKEN", "hunter2"),
            ("TOLLGATE__STORE__BACKEND", "redis"),
            ("TOLLGATE__STORE__URL", "redis://cache:6379"),
            ("TOLLGATE__STORE__RESPONSE_TIMEOUT_MS", "250"),
            ("TOLLGATE__FAILURE_MODE", "fail_open"),
            ("TOLLGATE__POLICIES__API_GENERAL__MAX_REQUESTS", "2"),
            ("OTHER__FAILURE_MODE", "propagate"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = from_yaml_and_env(yaml, vars).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server.admin_token.as_deref(), Some("hunter2"));
        assert_eq!(
            config.store,
            StoreConfig::Redis {
                url: "redis://cache:6379".to_string(),
                key_prefix: "tollgate:".to_string(),
                response_timeout_ms: 250,
            }
        );
        assert_eq!(config.failure_mode, FailureMode::FailOpen);

        let general = config.policy_registry().unwrap().get("api_general").unwrap();
        assert_eq!(general.max_requests(), 2);
        assert_eq!(general.window().as_millis(), 1000);
    }

    #[test]
    fn test_file_wins_without_environment() {
        let yaml = r#"
server:
  listen_addr: "127.0.0.1:4000"
"#;
        let config = from_yaml_and_env(yaml, config::Map::new()).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.server.admin_token, None);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_invalid_policy_rejected_at_load() {
        let yaml = r#"
policies:
  broken:
    window_ms: 0
    max_requests: 5
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPolicy { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = TollgateConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }
}
