//! Who is calling: the key for all per-client admission state.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Used when the transport gives us nothing to go on.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Pick the client address, optionally honouring the first hop of
/// `X-Forwarded-For` when running behind a trusted proxy.
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> ClientId {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ClientId::new(ip);
        }
    }

    peer.map(|addr| ClientId::new(addr.ip().to_string()))
        .unwrap_or_else(ClientId::unknown)
}

impl FromRequestParts<Arc<AppState>> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(resolve(&parts.headers, peer, state.trust_forwarded_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn uses_peer_address_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        let peer: SocketAddr = "1.2.3.4:5555".parse().unwrap();

        assert_eq!(resolve(&headers, Some(peer), false).as_str(), "1.2.3.4");
    }

    #[test]
    fn trusts_first_forwarded_hop_when_enabled() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 10.0.0.1"));
        let peer: SocketAddr = "10.0.0.1:80".parse().unwrap();

        assert_eq!(resolve(&headers, Some(peer), true).as_str(), "9.9.9.9");
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(resolve(&HeaderMap::new(), None, true), ClientId::unknown());
    }
}
