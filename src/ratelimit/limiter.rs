//! Core fixed-window admission limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use super::clock::{Clock, SystemClock};
use super::entry::window_ms;
use super::key::LimitKey;
use super::policy::Policy;
use super::store::{EntryStore, StoreError};

/// What `check` does when the entry store fails.
///
/// The choice is made once per process. A limiter never mixes the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Return the store error to the caller, which answers with a server error.
    #[default]
    Propagate,
    /// Admit the request with a full quota and log a warning.
    FailOpen,
}

/// The outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window (0 when rejected)
    pub remaining: u64,
    /// Epoch milliseconds at which the current window ends
    pub reset_time: u64,
    /// The policy quota
    pub limit: u64,
    /// Rejection text, set only when `allowed` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Decision {
    /// Time until the window resets, as seen from `now`.
    pub fn retry_after(&self, now: u64) -> Duration {
        Duration::from_millis(self.reset_time.saturating_sub(now))
    }

    /// The reset time as a UTC timestamp.
    pub fn reset_at(&self) -> DateTime<Utc> {
        epoch_ms_to_utc(self.reset_time)
    }
}

/// A read-only snapshot of an identifier's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Requests observed this window, including rejected ones
    pub count: u64,
    /// Quota left, clamped at zero
    pub remaining: u64,
    /// Epoch milliseconds at which the window ends
    pub reset_time: u64,
}

pub(crate) fn epoch_ms_to_utc(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Admits or rejects requests for one policy namespace.
///
/// Cloning is cheap; clones share the store and clock.
#[derive(Clone)]
pub struct RateLimiter {
    policy: Arc<Policy>,
    prefix: String,
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("prefix", &self.prefix)
            .field("store", &self.store.backend())
            .field("failure_mode", &self.failure_mode)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter on the system clock that propagates store errors.
    pub fn new(policy: Arc<Policy>, prefix: impl Into<String>, store: Arc<dyn EntryStore>) -> Self {
        Self {
            policy,
            prefix: prefix.into(),
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

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The key namespace of this limiter.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The current time on this limiter's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Decide whether a request from `identifier` may proceed.
    ///
    /// The identifier is an opaque, non-empty key; callers map missing
    /// identities to a sentinel before calling. A quota rejection is an
    /// `Ok` decision with `allowed == false`. Only store faults are errors,
    /// and only under [`FailureMode::Propagate`].
    pub async fn check(&self, identifier: &str) -> Result<Decision, StoreError> {
        let key = LimitKey::new(&self.prefix, identifier);
        let now = self.clock.now_ms();
        let limit = self.policy.max_requests();

        trace!(key = %key, "Checking rate limit");

        let entry = match self
            .store
            .increment(&key.to_store_key(), self.policy.window(), now)
            .await
        {
            Ok(entry) => entry,
            Err(err) => return self.on_store_error(&key, now, err),
        };

        if entry.count > limit {
            debug!(
                key = %key,
                count = entry.count,
                limit,
                reset_time = entry.reset_time,
                "Rate limit exceeded"
            );
            return Ok(Decision {
                allowed: false,
                remaining: 0,
                reset_time: entry.reset_time,
                limit,
                message: Some(self.policy.message().to_string()),
            });
        }

        let remaining = entry.remaining(limit);
        trace!(key = %key, remaining, "Request admitted");

        Ok(Decision {
            allowed: true,
            remaining,
            reset_time: entry.reset_time,
            limit,
            message: None,
        })
    }

    /// Forget `identifier`'s entry so its next request opens a fresh window.
    ///
    /// A no-op when no entry exists.
    pub async fn reset(&self, identifier: &str) -> Result<(), StoreError> {
        let key = LimitKey::new(&self.prefix, identifier);
        self.store.remove(&key.to_store_key()).await?;
        debug!(key = %key, "Rate limit entry reset");
        Ok(())
    }

    /// Snapshot `identifier`'s entry without counting a request.
    ///
    /// `None` means no live entry: a full quota is available.
    pub async fn status(&self, identifier: &str) -> Result<Option<Status>, StoreError> {
        let key = LimitKey::new(&self.prefix, identifier);
        let now = self.clock.now_ms();
        let limit = self.policy.max_requests();

        let entry = self.store.get(&key.to_store_key(), now).await?;

        Ok(entry.map(|entry| Status {
            count: entry.count,
            remaining: entry.remaining(limit),
            reset_time: entry.reset_time,
        }))
    }

    fn on_store_error(
        &self,
        key: &LimitKey,
        now: u64,
        err: StoreError,
    ) -> Result<Decision, StoreError> {
        match self.failure_mode {
            FailureMode::Propagate => {
                error!(key = %key, store = self.store.backend(), error = %err, "Rate limit store failed");
                Err(err)
            }
            FailureMode::FailOpen => {
                warn!(
                    key = %key,
                    store = self.store.backend(),
                    error = %err,
                    "Rate limit store failed, admitting request"
                );
                let limit = self.policy.max_requests();
                Ok(Decision {
                    allowed: true,
                    remaining: limit,
                    reset_time: now.saturating_add(window_ms(self.policy.window())),
                    limit,
                    message: None,
                })
            }
        }
    }
}
