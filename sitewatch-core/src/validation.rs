//! Target URL validation and SSRF protection utilities

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{Result, WatchError};

/// Longest raw URL accepted from a user.
pub const MAX_URL_LENGTH: usize = 300;

static HOST_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.-]+$").unwrap());

/// Validate a user-supplied URL and return its canonical `scheme://host` form.
///
/// Rules are checked in order and the first failing rule decides the error:
/// length, control characters, scheme, host presence, path/query/fragment,
/// explicit port, host character set, private or loopback address, and
/// finally markup characters in the host.
///
/// The canonical form is the deduplication key of a registry, so validating
/// an already-normalized URL returns it unchanged.
pub fn validate_url(raw: &str) -> Result<String> {
    if raw.chars().count() > MAX_URL_LENGTH {
        return Err(invalid(format!(
            "URL is too long (max {} characters)",
            MAX_URL_LENGTH
        )));
    }

    if contains_control_chars(raw) {
        return Err(invalid("URL contains control characters"));
    }

    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|e| invalid(format!("Invalid URL: {}", e)))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(invalid("URL must start with http:// or https://"));
    }

    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => return Err(invalid("URL has no host")),
    };

    if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid(
            "URL must not contain a path, query or fragment",
        ));
    }

    // Url drops default ports silently, so look at the raw authority too.
    if url.port().is_some() || raw_authority_has_port(raw) {
        return Err(invalid("URL must not contain a port"));
    }

    if !HOST_CHARS.is_match(&host) {
        return Err(invalid(format!("Invalid host: {}", host)));
    }

    if is_blocked_host(&host) {
        return Err(invalid(format!(
            "Host {} is a private or loopback address",
            host
        )));
    }

    if host.contains(['<', '>', ';']) {
        return Err(invalid(format!("Invalid host: {}", host)));
    }

    Ok(format!("{}://{}", scheme, host.trim_end_matches('.')))
}

/// Returns true for the characters a registry URL may never contain.
pub fn contains_control_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_control())
}

/// Extract the host of an already-validated target URL.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_string()))
        .filter(|h| !h.is_empty())
}

/// Host names and literals that probes refuse to contact.
pub fn is_blocked_host(host: &str) -> bool {
    let host = host.trim_matches(['[', ']']).to_lowercase();
    if matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1") || host.ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>()
        .map(|ip| is_private_or_reserved_ip(&ip))
        .unwrap_or(false)
}

fn invalid(reason: impl Into<String>) -> WatchError {
    WatchError::InvalidUrl(reason.into())
}

fn raw_authority_has_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);

    if let Some(after_bracket) = host_port.strip_prefix('[') {
        return after_bracket
            .split_once(']')
            .is_some_and(|(_, tail)| tail.starts_with(':'));
    }
    host_port.contains(':')
}

/// Check if an IP address is in a private or reserved range
///
/// This includes:
/// - Private networks (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
/// - Loopback (127.0.0.0/8, ::1/128)
/// - Link-local (169.254.0.0/16, fe80::/10)
/// - Unique local addresses (fc00::/7)
/// - Documentation ranges (192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24)
/// - Multicast, broadcast and unspecified
pub fn is_private_or_reserved_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_or_reserved_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_or_reserved_ipv6(ipv6),
    }
}

fn is_private_or_reserved_ipv4(ip: &Ipv4Addr) -> bool {
    if ip.is_private() || ip.is_loopback() || ip.is_link_local() {
        return true;
    }

    if ip.is_broadcast() || ip.is_unspecified() || ip.is_multicast() {
        return true;
    }

    let octets = ip.octets();

    // TEST-NET-1/2/3
    if (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
    {
        return true;
    }

    // 240.0.0.0/4
    octets[0] >= 240
}

fn is_private_or_reserved_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let segments = ip.segments();

    // fc00::/7
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }

    // fe80::/10
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }

    // ff00::/8
    if segments[0] >> 8 == 0xff {
        return true;
    }

    ip.to_ipv4_mapped()
        .is_some_and(|ipv4| is_private_or_reserved_ipv4(&ipv4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(raw: &str) -> String {
        match validate_url(raw) {
            Err(WatchError::InvalidUrl(r)) => r,
            other => panic!("expected InvalidUrl for {:?}, got {:?}", raw, other),
        }
    }

    #[test]
    fn test_validate_url_normalizes() {
        assert_eq!(validate_url("https://example.com").unwrap(), "https://example.com");
        assert_eq!(validate_url("https://example.com/").unwrap(), "https://example.com");
        assert_eq!(validate_url("HTTP://Example.COM").unwrap(), "http://example.com");
        assert_eq!(validate_url("  https://example.com  ").unwrap(), "https://example.com");
        assert_eq!(
            validate_url("https://user@example.com/").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_validate_url_is_idempotent() {
        for raw in [
            "https://example.com/",
            "http://Sub.Example.org",
            "https://bücher.de",
            "https://a-b.example.co.uk/",
        ] {
            let once = validate_url(raw).unwrap();
            assert_eq!(validate_url(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_validate_url_punycodes_idn_hosts() {
        assert_eq!(validate_url("https://bücher.de").unwrap(), "https://xn--bcher-kva.de");
    }

    #[test]
    fn test_rule_order_length_first() {
        let long = format!("https://{}.com/\n", "a".repeat(300));
        assert!(reason(&long).contains("too long"));
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(reason("https://example.com\n").contains("control"));
        assert!(reason("https://exa\tmple.com").contains("control"));
        assert!(reason("https://example.com\r").contains("control"));
    }

    #[test]
    fn test_rejects_bad_schemes() {
        assert!(reason("ftp://example.com").contains("http"));
        assert!(reason("javascript:alert(1)").contains("http"));
        assert!(reason("example.com").starts_with("Invalid URL"));
    }

    #[test]
    fn test_rejects_path_query_fragment() {
        assert!(reason("https://example.com/path").contains("path"));
        assert!(reason("https://example.com/?q=1").contains("path"));
        assert!(reason("https://example.com/#top").contains("path"));
    }

    #[test]
    fn test_rejects_ports() {
        assert!(reason("https://example.com:8443").contains("port"));
        assert!(reason("https://example.com:443").contains("port"));
        assert!(reason("http://example.com:80/").contains("port"));
    }

    #[test]
    fn test_rejects_private_and_loopback_hosts() {
        for raw in [
            "http://127.0.0.1",
            "http://10.0.0.5",
            "http://192.168.1.1",
            "http://localhost",
            "https://LOCALHOST/",
            "http://[::1]",
            "http://169.254.169.254",
        ] {
            assert!(validate_url(raw).is_err(), "{} should be rejected", raw);
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://example.com").as_deref(), Some("example.com"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_is_blocked_host() {
        assert!(is_blocked_host("localhost"));
        assert!(is_blocked_host("10.1.2.3"));
        assert!(is_blocked_host("::1"));
        assert!(!is_blocked_host("example.com"));
        assert!(!is_blocked_host("8.8.8.8"));
    }

    #[test]
    fn test_is_private_or_reserved_ipv4() {
        assert!(is_private_or_reserved_ip(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(is_private_or_reserved_ip(&IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
        assert!(is_private_or_reserved_ip(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_private_or_reserved_ip(&IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))));
        assert!(!is_private_or_reserved_ip(&IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))));
    }

    #[test]
    fn test_is_private_or_reserved_ipv6() {
        assert!(is_private_or_reserved_ip(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_private_or_reserved_ip(&IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))));
        assert!(!is_private_or_reserved_ip(&IpAddr::V6(Ipv6Addr::new(
            0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888
        ))));
    }
}
