//! Entry storage backends.
//!
//! The limiter never reads, modifies and writes an entry itself. It asks the
//! store for the atomic "open a window or bump the count" primitive, so that
//! concurrent requests for the same key cannot lose increments regardless of
//! the backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::clock::Clock;
use super::entry::LimitEntry;
use crate::config::StoreConfig;

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by an entry store.
///
/// These are infrastructure faults. They never stand for a quota rejection.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the configured timeout.
    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with an error or a malformed reply.
    #[error("store command failed: {0}")]
    Command(String),
}

/// Storage capability for limit entries.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Record one request for `key` at `now`.
    ///
    /// If no live entry exists, or the stored window ended before `now`, a
    /// fresh entry `{count: 1, reset_time: now + window}` replaces it.
    /// Otherwise the count is incremented. The returned entry is the state
    /// after the update. The whole sequence is atomic per key.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: u64,
    ) -> Result<LimitEntry, StoreError>;

    /// Read the entry for `key` without modifying it. Expired entries read
    /// as absent.
    async fn get(&self, key: &str, now: u64) -> Result<Option<LimitEntry>, StoreError>;

    /// Delete the entry for `key`. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Build the store selected by configuration.
///
/// The memory store gets its background sweeper started here, driven by the
/// same clock the limiter uses.
pub async fn from_config(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn EntryStore>, StoreError> {
    match config {
        StoreConfig::Memory {
            sweep_interval_secs,
        } => {
            let store = MemoryStore::new();
            store.spawn_sweeper(Duration::from_secs(*sweep_interval_secs), clock);
            info!(
                sweep_interval_secs = *sweep_interval_secs,
                "Using in-memory entry store"
            );
            Ok(Arc::new(store))
        }
        StoreConfig::Redis {
            url,
            key_prefix,
            response_timeout_ms,
        } => {
            let store = RedisStore::connect(
                url,
                key_prefix,
                Duration::from_millis(*response_timeout_ms),
            )
            .await?;
            info!(key_prefix = %key_prefix, "Using Redis entry store");
            Ok(Arc::new(store))
        }
    }
}
