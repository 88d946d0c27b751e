//! Redis entry store for multi-process deployments.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult, Script};
use tracing::{debug, trace};

use super::{EntryStore, StoreError};
use crate::ratelimit::entry::{window_ms, LimitEntry};

/// Atomically opens a window or increments the count.
///
/// KEYS[1] = entry key, ARGV[1] = now (epoch ms), ARGV[2] = window (ms).
/// Returns `{count, reset_time}`.
const INCREMENT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local reset = redis.call('HGET', KEYS[1], 'reset')
if (not reset) or now > tonumber(reset) then
  reset = now + window
  redis.call('HSET', KEYS[1], 'count', 1, 'reset', reset)
  redis.call('PEXPIRE', KEYS[1], window)
  return {1, reset}
end
local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
return {count, tonumber(reset)}
"#;

/// An entry store shared between processes through Redis.
///
/// Each key is a hash with `count` and `reset` fields. The increment runs as
/// a server-side script, so per-key updates are serialized by Redis itself.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    response_timeout: Duration,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Unavailable(err.to_string())
        } else if err.is_timeout() {
            StoreError::Command(format!("timeout: {err}"))
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a `PING`.
    pub async fn connect(
        url: &str,
        key_prefix: &str,
        response_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid Redis URL: {e}")))?;

        let conn = with_timeout(response_timeout, ConnectionManager::new(client)).await?;

        let store = Self {
            conn,
            key_prefix: key_prefix.to_string(),
            response_timeout,
            script: Script::new(INCREMENT_SCRIPT),
        };

        let mut conn = store.conn.clone();
        let pong: String = store
            .run(redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %pong, "Connected to Redis");

        Ok(store)
    }

    /// The Redis key holding the entry for a `prefix:identifier` key.
    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.key_prefix, key)
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        with_timeout(self.response_timeout, fut).await
    }
}

fn namespaced_key(key_prefix: &str, key: &str) -> String {
    format!("{key_prefix}{key}")
}

fn entry_from_fields(count: Option<u64>, reset: Option<u64>) -> Option<LimitEntry> {
    match (count, reset) {
        (Some(count), Some(reset_time)) => Some(LimitEntry { count, reset_time }),
        _ => None,
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[async_trait]
impl EntryStore for RedisStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: u64,
    ) -> Result<LimitEntry, StoreError> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();

        let mut invocation = self.script.key(&key);
        invocation.arg(now).arg(window_ms(window));

        let (count, reset_time): (u64, u64) = self.run(invocation.invoke_async(&mut conn)).await?;

        trace!(key = %key, count, reset_time, "Incremented entry");
        Ok(LimitEntry { count, reset_time })
    }

    async fn get(&self, key: &str, now: u64) -> Result<Option<LimitEntry>, StoreError> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("HMGET");
        cmd.arg(&key).arg("count").arg("reset");

        let (count, reset): (Option<u64>, Option<u64>) = self.run(cmd.query_async(&mut conn)).await?;

        Ok(entry_from_fields(count, reset).filter(|entry| !entry.is_expired(now)))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("DEL");
        cmd.arg(&key);

        let deleted: u64 = self.run(cmd.query_async(&mut conn)).await?;
        trace!(key = %key, deleted, "Removed entry");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
