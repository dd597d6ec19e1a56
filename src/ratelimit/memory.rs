//! In-process counter store.
//!
//! Used for single-instance deployments and tests. Per-key atomicity
//! comes from holding the map's entry guard across the whole
//! prune-count-record sequence; there is no await point inside it.

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{CounterStore, StoreStats, WindowSample};
use crate::error::Result;

/// Sliding-window counter store backed by process memory.
///
/// Counters do not survive a restart and are not shared across
/// instances; multi-instance deployments use the Redis store.
#[derive(Default)]
pub struct MemoryCounterStore {
    /// Event timestamps (epoch ms) per counter key
    entries: DashMap<String, Vec<u64>>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now_ms: u64,
    ) -> Result<WindowSample> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        let events = entry.value_mut();

        let cutoff = now_ms.saturating_sub(window_secs * 1000);
        events.retain(|&ts| ts > cutoff);

        let count = events.len() as u64;
        let allowed = count < limit;
        if allowed {
            events.push(now_ms);
        }

        Ok(WindowSample {
            allowed,
            count,
            oldest_ms: events.iter().min().copied(),
        })
    }

    async fn peek(&self, key: &str, window_secs: u64, now_ms: u64) -> Result<u64> {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                let cutoff = now_ms.saturating_sub(window_secs * 1000);
                entry.value_mut().retain(|&ts| ts > cutoff);
                Ok(entry.value().len() as u64)
            }
            None => Ok(0),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in self.entries.iter() {
            if !entry.value().is_empty() {
                stats.active_keys += 1;
                stats.total_tracked_events += entry.value().len() as u64;
            }
        }
        Ok(stats)
    }
}
