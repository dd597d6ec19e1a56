//! HTTP surface: middleware and server wiring.

mod middleware;
mod server;

pub use middleware::{rate_limit_middleware, RateLimitState};
pub use server::HttpServer;
