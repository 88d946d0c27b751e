//! Policy lookup and limiter construction for the HTTP layer.

use std::sync::Arc;

use tracing::warn;

use super::clock::{Clock, SystemClock};
use super::limiter::{FailureMode, RateLimiter};
use super::policy::PolicyRegistry;
use super::store::EntryStore;
use crate::error::{Result, TollgateError};

/// Hands out limiters for named policies over one shared store.
///
/// All limiters share the store, clock and failure mode, so a policy name
/// always maps to the same `rl:<name>` namespace.
#[derive(Clone)]
pub struct Gatekeeper {
    policies: Arc<PolicyRegistry>,
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
}

impl Gatekeeper {
    /// Create a gatekeeper on the system clock.
    pub fn new(policies: PolicyRegistry, store: Arc<dyn EntryStore>) -> Self {
        Self {
            policies: Arc::new(policies),
            store,
            clock: Arc::new(SystemClock),
            failure_mode: FailureMode::default(),
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Choose how store failures affect admission.
    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// The registered policies.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// The configured failure mode.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Build the limiter for a named policy.
    pub fn limiter(&self, policy_name: &str) -> Result<RateLimiter> {
        let Some(policy) = self.policies.get(policy_name) else {
            warn!(policy = policy_name, "Unknown rate limit policy requested");
            return Err(TollgateError::UnknownPolicy(policy_name.to_string()));
        };

        let prefix = policy.prefix();
        Ok(RateLimiter::new(policy, prefix, self.store.clone())
            .with_clock(self.clock.clone())
            .with_failure_mode(self.failure_mode))
    }
}

impl std::fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("policies", &self.policies.names())
            .field("store", &self.store.backend())
            .field("failure_mode", &self.failure_mode)
            .finish()
    }
}
