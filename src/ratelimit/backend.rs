//! Counter store trait for abstracting the shared counting backend.

use async_trait::async_trait;

use crate::error::Result;

/// What the backend observed inside one atomic check-and-increment.
///
/// `count` is the number of events inside the window before this call;
/// `oldest_ms` is the timestamp of the oldest surviving event after
/// pruning, including a just-recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    /// Whether the event was recorded (count was below the limit)
    pub allowed: bool,
    /// Events in the window before this call
    pub count: u64,
    /// Oldest surviving event timestamp, epoch milliseconds
    pub oldest_ms: Option<u64>,
}

/// Aggregate counter statistics for capacity monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live counter keys
    pub active_keys: u64,
    /// Total events currently tracked across all counters
    pub total_tracked_events: u64,
}

/// Trait for sliding-window counter store implementations.
///
/// This trait abstracts over the in-process store and the Redis-backed
/// store. Prune, count and record must happen as one indivisible
/// operation per key: a read-then-write sequence split across two round
/// trips lets two concurrent callers both observe `count < limit` and
/// overshoot the limit.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically prune expired events, count the rest, and record a new
    /// event when the count is below the limit.
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now_ms: u64,
    ) -> Result<WindowSample>;

    /// Count events inside the window without recording anything.
    async fn peek(&self, key: &str, window_secs: u64, now_ms: u64) -> Result<u64>;

    /// Delete a counter. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Aggregate statistics over all counters.
    async fn stats(&self) -> Result<StoreStats>;
}
