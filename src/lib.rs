//! Ratewarden - Distributed Sliding-Window Rate Limiting Middleware
//!
//! This crate implements a request-rate governor for HTTP API boundaries.
//! Per-endpoint quotas are evaluated over multiple sliding time windows
//! against a shared atomic counting backend (Redis), so limits hold across
//! worker tasks and across service instances. On backend failure the
//! limiter fails open: availability of the protected service wins over
//! strict quota enforcement.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
