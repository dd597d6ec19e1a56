//! Rate limiting logic and state management.

mod admin;
mod backend;
mod counter;
mod identity;
mod limiter;
mod memory;
mod redis;
mod rules;

pub use admin::{AdminFacade, StatsSnapshot};
pub use backend::{CounterStore, StoreStats, WindowSample};
pub use counter::{counter_key, RateLimitDecision};
pub use identity::{identify, AuthenticatedUser, ClientKey};
pub use limiter::RateLimiter;
pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;
pub use rules::{MatchKind, Rule, RuleTable, RuleTableConfig, Tier};
