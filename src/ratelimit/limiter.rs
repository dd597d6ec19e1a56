//! Core rate limiter: multi-tier evaluation over a counter store.
//!
//! Tiers are checked from the shortest window to the longest, denying on
//! the first tier that is exhausted. When every tier passes, the decision
//! of the first (tightest) tier is reported, so clients see the limit
//! they are closest to exhausting. Backend failures and timeouts fail
//! open: the request proceeds and the degradation is logged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use super::backend::CounterStore;
use super::counter::{counter_key, RateLimitDecision};
use super::identity::ClientKey;
use super::rules::{Rule, RuleTable, Tier};

/// The rate limiter shared by all request handlers.
///
/// Holds no counter state itself; atomicity is delegated entirely to the
/// store, so no in-process locks guard the check path.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    rules: Arc<RuleTable>,
    backend_timeout: Duration,
    key_prefix: String,
    /// Tracks backend degradation so the transition is logged once,
    /// not on every failing request.
    degraded: RwLock<bool>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(
        store: Arc<dyn CounterStore>,
        rules: Arc<RuleTable>,
        backend_timeout: Duration,
        key_prefix: String,
    ) -> Self {
        Self {
            store,
            rules,
            backend_timeout,
            key_prefix,
            degraded: RwLock::new(false),
        }
    }

    /// The rule table this limiter evaluates against.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Evaluate every tier of a rule for a client.
    ///
    /// Never errors: any failure inside a tier check degrades to an
    /// allowing decision.
    pub async fn evaluate(&self, client: &ClientKey, rule: &Rule) -> RateLimitDecision {
        let now_ms = now_epoch_ms();

        let mut tiers = rule.tiers.iter();
        let Some(first) = tiers.next() else {
            // A rule without tiers limits nothing.
            return RateLimitDecision {
                allowed: true,
                limit: 0,
                remaining: 0,
                window_secs: 0,
                reset_epoch: now_ms / 1000,
                retry_after_secs: 0,
                tier_name: String::new(),
            };
        };

        let tightest = self.check_tier(client, first, now_ms).await;
        if !tightest.allowed {
            return tightest;
        }

        for tier in tiers {
            let decision = self.check_tier(client, tier, now_ms).await;
            if !decision.allowed {
                return decision;
            }
        }

        tightest
    }

    /// Run one tier's atomic check-and-increment, with deadline.
    async fn check_tier(
        &self,
        client: &ClientKey,
        tier: &Tier,
        now_ms: u64,
    ) -> RateLimitDecision {
        let key = counter_key(&self.key_prefix, client, &tier.name);

        let check = self
            .store
            .check_and_increment(&key, tier.limit, tier.window_secs, now_ms);

        match tokio::time::timeout(self.backend_timeout, check).await {
            Ok(Ok(sample)) => {
                self.note_recovered();
                trace!(
                    key = %key,
                    count = sample.count,
                    allowed = sample.allowed,
                    "Rate limit tier checked"
                );
                let decision = RateLimitDecision::from_sample(sample, tier, now_ms);
                if !decision.allowed {
                    debug!(
                        client = %client,
                        tier = %tier.name,
                        limit = tier.limit,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Ok(Err(e)) => {
                self.note_degraded(&e.to_string());
                RateLimitDecision::fail_open(tier, now_ms)
            }
            Err(_) => {
                self.note_degraded("backend timed out");
                RateLimitDecision::fail_open(tier, now_ms)
            }
        }
    }

    fn note_degraded(&self, reason: &str) {
        let mut degraded = self.degraded.write();
        if !*degraded {
            *degraded = true;
            warn!(reason = %reason, "Counting backend unavailable, failing open");
        } else {
            debug!(reason = %reason, "Counting backend still unavailable");
        }
    }

    fn note_recovered(&self) {
        let mut degraded = self.degraded.write();
        if *degraded {
            *degraded = false;
            info!("Counting backend recovered");
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
