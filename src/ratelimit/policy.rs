//! Rate limit policies and the named policy registry.
//!
//! A policy is the (window, quota, message) tuple governing one class of
//! endpoint. Policies are validated when they are registered, never at
//! request time, and are immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TollgateError};

/// Rejection text used when a policy carries no message of its own.
pub const DEFAULT_MESSAGE: &str = "Rate limit exceeded";

/// A validated rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: String,
    window: Duration,
    max_requests: u64,
    message: Option<String>,
}

impl Policy {
    /// Create a policy, rejecting a zero window or a zero quota.
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        max_requests: u64,
        message: Option<String>,
    ) -> Result<Self> {
        let name = name.into();

        if window.is_zero() {
            return Err(TollgateError::InvalidPolicy {
                name,
                reason: "window must be greater than zero".to_string(),
            });
        }

        if max_requests == 0 {
            return Err(TollgateError::InvalidPolicy {
                name,
                reason: "max_requests must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            name,
            window,
            max_requests,
            message,
        })
    }

    /// The registry name of this policy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of one window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The rejection message, falling back to [`DEFAULT_MESSAGE`].
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_MESSAGE)
    }

    /// The key namespace used for this policy: `rl:<name>`.
    pub fn prefix(&self) -> String {
        format!("rl:{}", self.name)
    }
}

/// The serialized form of a policy, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Optional rejection message
    #[serde(default)]
    pub message: Option<String>,
}

impl PolicyConfig {
    /// Validate this configuration into a [`Policy`].
    pub fn into_policy(self, name: &str) -> Result<Policy> {
        Policy::new(
            name,
            Duration::from_millis(self.window_ms),
            self.max_requests,
            self.message,
        )
    }
}

/// A policy table wrapped in a `policies:` key.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    policies: HashMap<String, PolicyConfig>,
}

/// The built-in policies of the dashboard API.
///
/// Authentication endpoints get small quotas over long windows, general
/// reads get larger quotas over short windows, and exports get small quotas
/// over short windows.
fn builtin_policies() -> Vec<(&'static str, u64, u64, &'static str)> {
    const MINUTE: u64 = 60 * 1000;
    const HOUR: u64 = 60 * MINUTE;

    vec![
        (
            "auth_login",
            15 * MINUTE,
            5,
            "Too many login attempts. Please try again in 15 minutes.",
        ),
        (
            "auth_signup",
            HOUR,
            3,
            "Too many signup attempts. Please try again later.",
        ),
        (
            "auth_password_reset",
            HOUR,
            3,
            "Too many password reset requests. Please try again in 1 hour.",
        ),
        ("api_general", MINUTE, 60, "Too many requests. Please slow down."),
        (
            "api_export",
            MINUTE,
            5,
            "Too many export requests. Please wait before exporting again.",
        ),
        ("api_admin", MINUTE, 100, "Rate limit exceeded."),
        (
            "api_write",
            MINUTE,
            10,
            "Too many POST requests. Please slow down.",
        ),
    ]
}

fn parse_error(err: serde_yaml::Error) -> TollgateError {
    TollgateError::Config(format!("Failed to parse policy table: {}", err))
}

/// A table of named, validated policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<Policy>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in dashboard policies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, window_ms, max_requests, message) in builtin_policies() {
            let policy = Policy {
                name: name.to_string(),
                window: Duration::from_millis(window_ms),
                max_requests,
                message: Some(message.to_string()),
            };
            registry.policies.insert(name.to_string(), Arc::new(policy));
        }
        registry
    }

    /// Load a policy table from a YAML string.
    ///
    /// Accepts either a bare `name -> policy` map or the same map nested
    /// under a `policies:` key.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;

        let table: HashMap<String, PolicyConfig> = if document.get("policies").is_some() {
            serde_yaml::from_str::<PolicyFile>(yaml)
                .map_err(parse_error)?
                .policies
        } else {
            serde_yaml::from_str(yaml).map_err(parse_error)?
        };
        debug!(policies = table.len(), "Parsed rate limit policy table");

        let mut registry = Self::new();
        registry.extend(table)?;
        Ok(registry)
    }

    /// Register every entry of a configuration table.
    ///
    /// Fails on the first invalid policy; nothing is half-applied because
    /// all entries are validated before any is inserted.
    pub fn extend(&mut self, table: HashMap<String, PolicyConfig>) -> Result<()> {
        let validated = table
            .into_iter()
            .map(|(name, config)| config.into_policy(&name).map(|p| (name, Arc::new(p))))
            .collect::<Result<Vec<_>>>()?;

        self.policies.extend(validated);
        Ok(())
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(name).cloned()
    }

    /// Names of all registered policies, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
