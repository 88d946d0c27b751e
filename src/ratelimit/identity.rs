//! Caller identification for rate limiting.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Identifier used when nothing about the caller is known.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// The authenticated principal of a request.
///
/// An upstream authentication layer inserts this as a request extension;
/// when present it takes precedence over any network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Derive the rate limit identifier for a request.
///
/// Priority: authenticated user (`user:<id>`), first `X-Forwarded-For` hop,
/// `X-Real-IP`, direct peer address, then [`UNKNOWN_IDENTIFIER`]. Blank
/// values at any level fall through to the next.
pub fn client_identifier(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    user: Option<&AuthenticatedUser>,
) -> String {
    if let Some(AuthenticatedUser(id)) = user {
        let id = id.trim();
        if !id.is_empty() {
            return format!("user:{id}");
        }
    }

    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        // Take the first address in the proxy chain
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(peer) = peer {
        return peer.ip().to_string();
    }

    UNKNOWN_IDENTIFIER.to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.168.0.9:51000".parse().unwrap())
    }

    #[test]
    fn test_user_takes_precedence() {
        let h = headers(&[("x-forwarded-for", "1.2.3.4")]);
        let user = AuthenticatedUser("42".to_string());
        assert_eq!(client_identifier(&h, peer(), Some(&user)), "user:42");
    }

    #[test]
    fn test_blank_user_falls_through() {
        let h = headers(&[("x-real-ip", "5.6.7.8")]);
        let user = AuthenticatedUser("  ".to_string());
        assert_eq!(client_identifier(&h, None, Some(&user)), "5.6.7.8");
    }

    #[test]
    fn test_first_forwarded_hop() {
        let h = headers(&[
            ("x-forwarded-for", " 1.2.3.4 , 10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "5.6.7.8"),
        ]);
        assert_eq!(client_identifier(&h, peer(), None), "1.2.3.4");
    }

    #[test]
    fn test_real_ip_before_peer() {
        let h = headers(&[("x-real-ip", "5.6.7.8")]);
        assert_eq!(client_identifier(&h, peer(), None), "5.6.7.8");
    }

    #[test]
    fn test_empty_forwarded_falls_through() {
        let h = headers(&[("x-forwarded-for", " , ")]);
        assert_eq!(client_identifier(&h, peer(), None), "192.168.0.9");
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(client_identifier(&HeaderMap::new(), None, None), UNKNOWN_IDENTIFIER);
    }
}
