//! Sliding-window decision math.
//!
//! The counting backend reports what it observed inside one atomic
//! operation; this module turns that observation into the
//! `RateLimitDecision` every layer above works with. Timestamps are
//! epoch milliseconds to avoid false collisions between events landing
//! in the same second.

use super::backend::WindowSample;
use super::identity::ClientKey;
use super::rules::Tier;

/// The outcome of one rate limit check.
///
/// Produced fresh per check, never stored. Invariants:
/// `remaining <= limit` and `reset_epoch >= now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The limit of the tier that produced this decision
    pub limit: u64,
    /// Requests left inside the window
    pub remaining: u64,
    /// Window length of the deciding tier, in seconds
    pub window_secs: u64,
    /// Epoch second at which the oldest counted event leaves the window
    pub reset_epoch: u64,
    /// Seconds the client should wait before retrying (denials only)
    pub retry_after_secs: u64,
    /// Name of the tier that produced this decision
    pub tier_name: String,
}

impl RateLimitDecision {
    /// Build a decision from a backend sample.
    pub fn from_sample(sample: WindowSample, tier: &Tier, now_ms: u64) -> Self {
        let now_secs = now_ms / 1000;
        let window_ms = tier.window_secs * 1000;

        // The window clears when the oldest surviving event ages out.
        let reset_ms = sample.oldest_ms.unwrap_or(now_ms) + window_ms;
        let reset_epoch = reset_ms.div_ceil(1000).max(now_secs);

        if sample.allowed {
            Self {
                allowed: true,
                limit: tier.limit,
                remaining: tier.limit - sample.count - 1,
                window_secs: tier.window_secs,
                reset_epoch,
                retry_after_secs: 0,
                tier_name: tier.name.clone(),
            }
        } else {
            Self {
                allowed: false,
                limit: tier.limit,
                remaining: 0,
                window_secs: tier.window_secs,
                reset_epoch,
                retry_after_secs: reset_epoch.saturating_sub(now_secs).max(1),
                tier_name: tier.name.clone(),
            }
        }
    }

    /// Best-effort placeholder used when the backend is unreachable.
    ///
    /// Fail-open: the request proceeds and `remaining` assumes this was
    /// the first event in a fresh window.
    pub fn fail_open(tier: &Tier, now_ms: u64) -> Self {
        let now_secs = now_ms / 1000;
        Self {
            allowed: true,
            limit: tier.limit,
            remaining: tier.limit - 1,
            window_secs: tier.window_secs,
            reset_epoch: now_secs + tier.window_secs,
            retry_after_secs: 0,
            tier_name: tier.name.clone(),
        }
    }
}

/// Counter key for a `(client, tier)` pair in the shared backend.
///
/// Two rules sharing a tier name deliberately share the counter: the
/// tier, not the path, is the unit a quota is tracked against.
pub fn counter_key(prefix: &str, client: &ClientKey, tier_name: &str) -> String {
    format!("{}:{}:{}", prefix, client, tier_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(limit: u64, window_secs: u64) -> Tier {
        Tier {
            name: "sustained".to_string(),
            limit,
            window_secs,
        }
    }

    #[test]
    fn test_allowed_decision_remaining() {
        // Third event of a limit-5 window
        let sample = WindowSample {
            allowed: true,
            count: 2,
            oldest_ms: Some(0),
        };
        let decision = RateLimitDecision::from_sample(sample, &tier(5, 60), 5_000);

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.retry_after_secs, 0);
        assert_eq!(decision.reset_epoch, 60);
    }

    #[test]
    fn test_denied_decision_retry_after() {
        // Five events recorded at t=0, sixth attempt at t=5s
        let sample = WindowSample {
            allowed: false,
            count: 5,
            oldest_ms: Some(0),
        };
        let decision = RateLimitDecision::from_sample(sample, &tier(5, 60), 5_000);

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_epoch, 60);
        assert_eq!(decision.retry_after_secs, 55);
    }

    #[test]
    fn test_retry_after_never_below_one() {
        // Oldest event is about to expire; retry_after still reads 1
        let sample = WindowSample {
            allowed: false,
            count: 5,
            oldest_ms: Some(0),
        };
        let decision = RateLimitDecision::from_sample(sample, &tier(5, 60), 59_999);

        assert_eq!(decision.retry_after_secs, 1);
        assert!(decision.reset_epoch >= 59);
    }

    #[test]
    fn test_reset_epoch_never_in_the_past() {
        let sample = WindowSample {
            allowed: true,
            count: 0,
            oldest_ms: Some(61_000),
        };
        let decision = RateLimitDecision::from_sample(sample, &tier(5, 60), 61_000);
        assert!(decision.reset_epoch >= 61);
    }

    #[test]
    fn test_fail_open_placeholder() {
        let decision = RateLimitDecision::fail_open(&tier(100, 60), 10_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 99);
        assert_eq!(decision.reset_epoch, 70);
    }

    #[test]
    fn test_counter_key_format() {
        let key = counter_key(
            "rw",
            &ClientKey::Ip("10.0.0.1".to_string()),
            "burst",
        );
        assert_eq!(key, "rw:ip:10.0.0.1:burst");
    }
}
