//! Redis-backed counter store.
//!
//! Each counter is a sorted set of event timestamps (epoch ms scores).
//! Prune, count and record run inside one server-evaluated Lua script, so
//! concurrent check-and-increment calls for the same key are totally
//! ordered by the Redis event loop and the limit can never overshoot.
//! Set members carry a uuid suffix so two events recorded in the same
//! millisecond never collide.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use uuid::Uuid;

use super::backend::{CounterStore, StoreStats, WindowSample};
use crate::error::Result;

/// TTL slack beyond the window, tolerating clock skew between instances.
const TTL_SLACK_MS: u64 = 1000;

/// Atomic prune + count + conditional record.
///
/// KEYS[1] counter key; ARGV: now_ms, window_ms, limit, member, ttl_ms.
/// Returns {allowed, count_before, oldest_ms (-1 when empty)}.
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1] - ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
local allowed = 0
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[5])
    allowed = 1
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
"#;

/// Prune + count only, for introspection.
const PEEK_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1] - ARGV[2])
return redis.call('ZCARD', KEYS[1])
"#;

/// Sliding-window counter store backed by a shared Redis instance.
///
/// The process holds no counter state, only this connection handle;
/// limits therefore hold across all service instances pointed at the
/// same Redis.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    key_prefix: String,
    check_script: Script,
    peek_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis and prepare the scripts.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            check_script: Script::new(CHECK_AND_INCREMENT_SCRIPT),
            peek_script: Script::new(PEEK_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now_ms: u64,
    ) -> Result<WindowSample> {
        let mut conn = self.conn.clone();
        let window_ms = window_secs * 1000;
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let (allowed, count, oldest_ms): (u8, u64, i64) = self
            .check_script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .arg(window_ms + TTL_SLACK_MS)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowSample {
            allowed: allowed == 1,
            count,
            oldest_ms: (oldest_ms >= 0).then_some(oldest_ms as u64),
        })
    }

    async fn peek(&self, key: &str, window_secs: u64, now_ms: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .peek_script
            .key(key)
            .arg(now_ms)
            .arg(window_secs * 1000)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.key_prefix);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut stats = StoreStats {
            active_keys: keys.len() as u64,
            total_tracked_events: 0,
        };
        for key in &keys {
            let events: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
            stats.total_tracked_events += events;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_are_single_transactions() {
        // Both scripts must prune and count in the same invocation;
        // splitting them across round trips would reintroduce the race.
        assert!(CHECK_AND_INCREMENT_SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(CHECK_AND_INCREMENT_SCRIPT.contains("ZCARD"));
        assert!(CHECK_AND_INCREMENT_SCRIPT.contains("ZADD"));
        assert!(CHECK_AND_INCREMENT_SCRIPT.contains("PEXPIRE"));
        assert!(PEEK_SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(!PEEK_SCRIPT.contains("ZADD"));
    }
}
