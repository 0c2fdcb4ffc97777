use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use native_tls::TlsConnector;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use super::types::{SslState, SslStatus};
use crate::error::{Result, WatchError};
use crate::timefmt;
use crate::validation::is_blocked_host;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TLS_PORT: u16 = 443;

/// TLS certificate probe.
///
/// Performs a verified handshake (chain and hostname) against the system
/// trust store and reads the leaf certificate's `notAfter`.
#[derive(Debug, Clone)]
pub struct TlsProbe {
    timeout: Duration,
}

impl Default for TlsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsProbe {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the certificate served by `host:port`. Single attempt.
    #[instrument(skip(self), fields(host = %host, port = port))]
    pub async fn check(&self, host: &str, port: u16) -> SslStatus {
        let url = format!("https://{}", host);

        if is_blocked_host(host) {
            warn!("Refusing TLS check of private or loopback host");
            return SslStatus::invalid(&url, "Private or loopback host");
        }

        match self.fetch_not_after(host, port).await {
            Ok(Some(expires)) => {
                info!(expires = %timefmt::format(&expires), "SSL check completed");
                SslStatus::valid(&url, expires)
            }
            Ok(None) => {
                warn!("Handshake completed without a peer certificate");
                SslStatus {
                    url,
                    state: SslState::NoCert,
                    expires: None,
                    error: Some("No certificate provided".to_string()),
                }
            }
            Err(e) => {
                warn!(error = %e, "SSL check failed");
                SslStatus::invalid(&url, e.to_string())
            }
        }
    }

    async fn fetch_not_after(&self, host: &str, port: u16) -> Result<Option<NaiveDateTime>> {
        let connector = TlsConnector::builder()
            .build()
            .map_err(|e| WatchError::Certificate(e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| WatchError::Timeout(format!("Connection to {} timed out", addr)))??;

        let tls_stream = tokio::time::timeout(self.timeout, connector.connect(host, stream))
            .await
            .map_err(|_| WatchError::Timeout(format!("TLS handshake with {} timed out", host)))?
            .map_err(|e| WatchError::Certificate(e.to_string()))?;

        let Some(cert) = tls_stream
            .get_ref()
            .peer_certificate()
            .map_err(|e| WatchError::Certificate(e.to_string()))?
        else {
            return Ok(None);
        };

        let der = cert
            .to_der()
            .map_err(|e| WatchError::Certificate(e.to_string()))?;
        let (_not_before, not_after) = extract_validity_from_der(&der)?;
        debug!(not_after = %not_after, "Parsed certificate validity");

        Ok(Some(not_after))
    }
}

/// Extract `(notBefore, notAfter)` from a DER certificate.
///
/// The validity SEQUENCE holds the first two time values of the certificate,
/// encoded as UTCTime (tag 0x17) or GeneralizedTime (tag 0x18).
pub fn extract_validity_from_der(der: &[u8]) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let mut times: Vec<NaiveDateTime> = Vec::with_capacity(2);

    let mut i = 0;
    while i + 2 < der.len() && times.len() < 2 {
        let tag = der[i];
        let len = der[i + 1] as usize;
        let body = der.get(i + 2..i + 2 + len);

        let parsed = match (tag, body) {
            (0x17, Some(bytes)) if len >= 13 => std::str::from_utf8(bytes).ok().and_then(parse_utc_time),
            (0x18, Some(bytes)) if len >= 15 => {
                std::str::from_utf8(bytes).ok().and_then(parse_generalized_time)
            }
            _ => None,
        };

        match parsed {
            Some(ts) => {
                times.push(ts);
                i += 2 + len;
            }
            None => i += 1,
        }
    }

    match times.as_slice() {
        [not_before, not_after] => Ok((*not_before, *not_after)),
        _ => Err(WatchError::Certificate(
            "Could not parse certificate validity dates".to_string(),
        )),
    }
}

/// UTCTime, `YYMMDDHHMMSSZ`
fn parse_utc_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.strip_suffix('Z')?;
    if s.len() != 12 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = s[0..2].parse().ok()?;
    let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };
    build_datetime(year, &s[2..])
}

/// GeneralizedTime, `YYYYMMDDHHMMSSZ`
fn parse_generalized_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.strip_suffix('Z')?;
    if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    build_datetime(year, &s[4..])
}

/// `rest` is `MMDDHHMMSS`
fn build_datetime(year: i32, rest: &str) -> Option<NaiveDateTime> {
    let field = |range: std::ops::Range<usize>| rest.get(range)?.parse::<u32>().ok();
    NaiveDate::from_ymd_opt(year, field(0..2)?, field(2..4)?)?.and_hms_opt(
        field(4..6)?,
        field(6..8)?,
        field(8..10)?,
    )
}
