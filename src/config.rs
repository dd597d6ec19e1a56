//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Whether to trust X-Forwarded-For headers for client identification.
    /// Enable only when the service sits behind a proxy that sets them.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_proxy_headers: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the rate limit rules configuration file
    pub rules_path: Option<String>,

    /// Redis connection URL for the shared counting backend.
    /// When absent, an in-process store is used (single-instance mode).
    pub redis_url: Option<String>,

    /// Deadline for a single counting-backend round trip, in milliseconds.
    /// On timeout the check fails open.
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Key prefix for counters in the shared backend
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            redis_url: None,
            backend_timeout_ms: default_backend_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_backend_timeout_ms() -> u64 {
    150
}

fn default_key_prefix() -> String {
    "rw".to_string()
}

impl RatewardenConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RatewardenConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::RatewardenError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RatewardenConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(!config.server.trust_proxy_headers);
        assert_eq!(config.rate_limiting.backend_timeout_ms, 150);
        assert!(config.rate_limiting.redis_url.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
  trust_proxy_headers: true
rate_limiting:
  redis_url: "redis://127.0.0.1:6379"
"#;
        let config: RatewardenConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.trust_proxy_headers);
        assert_eq!(
            config.rate_limiting.redis_url.as_deref(),
            Some("redis://127.0.0.1:6379")
        );
        // Unspecified fields fall back to defaults
        assert_eq!(config.rate_limiting.backend_timeout_ms, 150);
        assert_eq!(config.rate_limiting.key_prefix, "rw");
    }
}
