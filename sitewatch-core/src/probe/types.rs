use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Result of the HTTP reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteStatus {
    /// The URL that was fetched
    pub url: String,
    /// `"<code> <reason>"` of the final response, or `"down"`
    pub status: String,
    /// Transport error once all retries were used up
    pub error: Option<String>,
}

impl WebsiteStatus {
    pub fn up(url: &str, status: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            status: status.into(),
            error: None,
        }
    }

    pub fn down(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            status: "down".to_string(),
            error: Some(error.into()),
        }
    }

    /// Healthy means no probe error and a status line containing `200`.
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.status.contains("200")
    }
}

/// Outcome of the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslState {
    Valid,
    Invalid,
    /// Handshake completed but the peer sent no certificate
    #[serde(rename = "no_ssl")]
    NoCert,
    Unknown,
}

impl fmt::Display for SslState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SslState::Valid => write!(f, "valid"),
            SslState::Invalid => write!(f, "invalid"),
            SslState::NoCert => write!(f, "no_ssl"),
            SslState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of the TLS certificate probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslStatus {
    pub url: String,
    pub state: SslState,
    /// Certificate `notAfter`, UTC
    pub expires: Option<NaiveDateTime>,
    pub error: Option<String>,
}

impl SslStatus {
    pub fn valid(url: &str, expires: NaiveDateTime) -> Self {
        Self {
            url: url.to_string(),
            state: SslState::Valid,
            expires: Some(expires),
            error: None,
        }
    }

    pub fn invalid(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            state: SslState::Invalid,
            expires: None,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.state == SslState::Valid
    }
}

/// Result of the WHOIS registration probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: String,
    pub expires: Option<NaiveDateTime>,
    pub registrar: Option<String>,
    pub registrar_url: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl DomainStatus {
    pub fn failed(domain: &str, error: impl Into<String>) -> Self {
        Self {
            domain: domain.to_string(),
            expires: None,
            registrar: None,
            registrar_url: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Snapshot produced by the DNS probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsStatus {
    pub domain: String,
    /// Sorted IPv4 addresses
    pub a_records: Vec<String>,
    /// Sorted `"<preference> <exchange>"` entries
    pub mx_records: Vec<String>,
    /// Any other requested type, keyed by lowercase type name
    pub other_records: BTreeMap<String, Vec<String>>,
    pub success: bool,
    pub error: Option<String>,
}

impl DnsStatus {
    pub fn failed(domain: &str, error: impl Into<String>) -> Self {
        Self {
            domain: domain.to_string(),
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Everything one probe run produced for a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub website: WebsiteStatus,
    pub ssl: SslStatus,
    pub domain: Option<DomainStatus>,
    pub dns: Option<DnsStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_website_health() {
        assert!(WebsiteStatus::up("https://a.com", "200 OK").is_healthy());
        assert!(!WebsiteStatus::up("https://a.com", "503 Service Unavailable").is_healthy());
        assert!(!WebsiteStatus::down("https://a.com", "refused").is_healthy());
    }

    #[test]
    fn test_ssl_state_wire_names() {
        assert_eq!(serde_json::to_string(&SslState::NoCert).unwrap(), "\"no_ssl\"");
        assert_eq!(serde_json::to_string(&SslState::Valid).unwrap(), "\"valid\"");
        assert_eq!(SslState::NoCert.to_string(), "no_ssl");
    }

    #[test]
    fn test_ssl_health() {
        let expires = crate::timefmt::parse("2030-01-01 00:00:00").unwrap();
        assert!(SslStatus::valid("https://a.com", expires).is_healthy());
        assert!(!SslStatus::invalid("https://a.com", "handshake failed").is_healthy());
    }
}
