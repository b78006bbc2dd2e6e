//! Request extractors.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use sync_core::RequestMetadata;

/// Client address and user agent captured for the attempt log.
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata(pub RequestMetadata);

#[async_trait]
impl<S> FromRequestParts<S> for ClientMetadata
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientMetadata(RequestMetadata {
            user_agent: header_value(&parts.headers, header::USER_AGENT.as_str()),
            ip: client_ip(&parts.headers),
        }))
    }
}

/// Originating client address from proxy headers.
///
/// `X-Forwarded-For` wins (first hop), then `X-Real-IP`, then
/// `CF-Connecting-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = header_value(headers, "x-forwarded-for") {
        if let Some(ip) = xff.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return Some(ip.to_string());
        }
    }

    header_value(headers, "x-real-ip").or_else(|| header_value(headers, "cf-connecting-ip"))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
