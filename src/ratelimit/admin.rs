//! Operator-facing usage introspection and manual reset.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::backend::CounterStore;
use super::counter::counter_key;
use super::identity::ClientKey;
use super::limiter::now_epoch_ms;
use super::rules::RuleTable;

/// Aggregate counter statistics for capacity monitoring.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Live counter keys in the backend
    pub active_keys: u64,
    /// Events currently tracked across all counters
    pub total_tracked_events: u64,
    /// Whether the backend answered; false means the numbers are stale zeros
    pub backend_reachable: bool,
}

/// Read-only introspection plus manual reset, for operators.
///
/// Every operation is best-effort: backend failure is reported in the
/// result, never propagated as an error.
pub struct AdminFacade {
    store: Arc<dyn CounterStore>,
    rules: Arc<RuleTable>,
    key_prefix: String,
}

impl AdminFacade {
    /// Create a facade over the same store and rules the limiter uses.
    pub fn new(store: Arc<dyn CounterStore>, rules: Arc<RuleTable>, key_prefix: String) -> Self {
        Self {
            store,
            rules,
            key_prefix,
        }
    }

    /// Current event count for a `(client, tier)` counter. Peek only.
    ///
    /// An unknown tier reads as 0: without a configured window there is
    /// nothing to prune against, and an absent counter is indistinguishable
    /// from an absent tier.
    pub async fn usage(&self, client: &ClientKey, tier_name: &str) -> u64 {
        let Some(tier) = self
            .rules
            .known_tiers()
            .into_iter()
            .find(|tier| tier.name == tier_name)
        else {
            return 0;
        };

        let key = counter_key(&self.key_prefix, client, &tier.name);
        match self.store.peek(&key, tier.window_secs, now_epoch_ms()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "Usage lookup failed");
                0
            }
        }
    }

    /// Delete every tier counter for a client.
    ///
    /// Returns true when at least one counter existed. Used for
    /// operator-driven appeals and testing.
    pub async fn reset(&self, client: &ClientKey) -> bool {
        let mut removed_any = false;

        for tier in self.rules.known_tiers() {
            let key = counter_key(&self.key_prefix, client, &tier.name);
            match self.store.remove(&key).await {
                Ok(removed) => removed_any |= removed,
                Err(e) => {
                    warn!(key = %key, error = %e, "Counter reset failed");
                }
            }
        }

        if removed_any {
            info!(client = %client, "Rate limit counters reset");
        }
        removed_any
    }

    /// Aggregate statistics across all counters.
    pub async fn aggregate_stats(&self) -> StatsSnapshot {
        match self.store.stats().await {
            Ok(stats) => StatsSnapshot {
                active_keys: stats.active_keys,
                total_tracked_events: stats.total_tracked_events,
                backend_reachable: true,
            },
            Err(e) => {
                warn!(error = %e, "Stats collection failed");
                StatsSnapshot {
                    active_keys: 0,
                    total_tracked_events: 0,
                    backend_reachable: false,
                }
            }
        }
    }
}
