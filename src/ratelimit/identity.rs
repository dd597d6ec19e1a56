//! Client identity resolution.
//!
//! Every request is attributed to a stable `ClientKey` that quotas are
//! tracked against. Resolution never fails: when no identity signal is
//! available the request lands in the shared `unknown` bucket, which is
//! rate-limited as one coarse pool rather than left unlimited.

use std::net::IpAddr;

/// The identity string a quota is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Authenticated user
    User(String),
    /// Direct peer or forwarded client address
    Ip(String),
    /// No identity signal available; one shared bucket
    Unknown,
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{}", id),
            ClientKey::Ip(addr) => write!(f, "ip:{}", addr),
            ClientKey::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ClientKey {
    type Err = crate::error::RatewardenError;

    /// Parse the rendered form back into a key, for admin operations.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("user:") {
            if !id.is_empty() {
                return Ok(ClientKey::User(id.to_string()));
            }
        } else if let Some(addr) = s.strip_prefix("ip:") {
            if !addr.is_empty() {
                return Ok(ClientKey::Ip(addr.to_string()));
            }
        } else if s == "unknown" {
            return Ok(ClientKey::Unknown);
        }
        Err(crate::error::RatewardenError::Config(format!(
            "invalid client key: {}",
            s
        )))
    }
}

/// Authenticated identity placed on the request by the auth layer upstream.
///
/// The limiter only reads this extension; producing it is the surrounding
/// framework's concern.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Resolve the client key for a request.
///
/// Precedence: authenticated user, then the first hop of the forwarded-for
/// chain (only when proxy headers are trusted), then the direct peer
/// address, then `unknown`. A malformed forwarded header degrades to the
/// next source rather than erroring.
pub fn identify(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    peer_addr: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> ClientKey {
    if let Some(id) = user_id {
        if !id.is_empty() {
            return ClientKey::User(id.to_string());
        }
    }

    if trust_proxy_headers {
        if let Some(addr) = forwarded_for.and_then(first_forwarded_addr) {
            return ClientKey::Ip(addr);
        }
    }

    if let Some(addr) = peer_addr {
        return ClientKey::Ip(addr.to_string());
    }

    ClientKey::Unknown
}

/// Extract the first address from an X-Forwarded-For chain.
///
/// Only syntactically valid IP addresses are accepted; anything else is
/// treated as absent.
fn first_forwarded_addr(header: &str) -> Option<String> {
    let first = header.split(',').next()?.trim();
    first.parse::<IpAddr>().ok().map(|addr| addr.to_string())
}
