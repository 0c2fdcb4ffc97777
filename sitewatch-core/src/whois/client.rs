use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::parser::WhoisResponse;
use super::servers::{get_tld, get_whois_server, remember_whois_server, IANA_WHOIS_SERVER};
use crate::error::{Result, WatchError};
use crate::probe::DomainStatus;
use crate::validation::is_blocked_host;

const WHOIS_PORT: u16 = 43;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB
const MAX_REFERRAL_DEPTH: u8 = 3;

static REFERRAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?im)^\s*Registrar WHOIS Server:[ \t]*(.+)$",
        r"(?im)^\s*Whois Server:[ \t]*(.+)$",
        r"(?im)^\s*ReferralServer:[ \t]*whois://(.+)$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static IANA_REFER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?im)^\s*refer:[ \t]*(\S+)", r"(?im)^\s*whois:[ \t]*(\S+)"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

#[derive(Debug, Clone)]
pub struct WhoisClient {
    timeout: Duration,
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WhoisClient {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registration expiry of `host`, with every failure folded into the
    /// returned record.
    #[instrument(skip(self), fields(host = %host))]
    pub async fn check_expiration(&self, host: &str) -> DomainStatus {
        if is_blocked_host(host) {
            warn!("Refusing WHOIS lookup of private or loopback host");
            return DomainStatus::failed(host, "Private or loopback host");
        }

        let response = match self.lookup(host).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "WHOIS lookup failed");
                return DomainStatus::failed(host, e.to_string());
            }
        };

        let mut status = DomainStatus::failed(host, "");
        status.registrar = response.registrar.clone();
        status.registrar_url = response.registrar_url.clone();

        match (&response.expiration_raw, response.expiration_date) {
            (_, Some(expires)) => {
                info!(expires = %expires, "WHOIS check completed");
                status.expires = Some(expires);
                status.success = true;
                status.error = None;
            }
            (Some(raw), None) => {
                warn!(raw = %raw, "Unrecognized expiration date format");
                status.error = Some("Invalid expiration date format".to_string());
            }
            (None, None) if response.is_available() => {
                status.error = Some("Domain not found in WHOIS".to_string());
            }
            (None, None) => {
                status.error = Some("No expiration date found".to_string());
            }
        }

        status
    }

    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn lookup(&self, domain: &str) -> Result<WhoisResponse> {
        let domain = normalize_domain(domain)?;
        let tld = get_tld(&domain).ok_or_else(|| WatchError::InvalidUrl(domain.clone()))?;

        let whois_server = match get_whois_server(tld) {
            Some(server) => server,
            None => self.discover_server(tld).await?,
        };

        let mut visited = HashSet::new();
        self.lookup_with_referrals(&domain, &whois_server, 0, &mut visited)
            .await
    }

    /// Ask IANA which server is authoritative for `tld`.
    async fn discover_server(&self, tld: &str) -> Result<String> {
        debug!(tld = %tld, "Discovering WHOIS server via IANA");
        let raw = self.query_server(IANA_WHOIS_SERVER, tld).await?;

        let server = IANA_REFER_PATTERNS
            .iter()
            .find_map(|re| re.captures(&raw)?.get(1).map(|m| m.as_str().to_lowercase()))
            .filter(|s| s.contains('.'))
            .ok_or_else(|| WatchError::WhoisServerNotFound(tld.to_string()))?;

        remember_whois_server(tld, &server);
        Ok(server)
    }

    fn lookup_with_referrals<'a>(
        &'a self,
        domain: &'a str,
        whois_server: &'a str,
        depth: u8,
        visited: &'a mut HashSet<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<WhoisResponse>> + Send + 'a>>
    {
        Box::pin(async move {
            if depth >= MAX_REFERRAL_DEPTH {
                warn!(depth = depth, server = %whois_server, "Max referral depth exceeded");
                return Err(WatchError::Whois(
                    "Maximum WHOIS referral depth exceeded".to_string(),
                ));
            }

            let server_lower = whois_server.to_lowercase();
            if visited.contains(&server_lower) {
                warn!(server = %whois_server, "Circular WHOIS referral detected");
                return Err(WatchError::Whois(
                    "Circular WHOIS referral detected".to_string(),
                ));
            }
            visited.insert(server_lower);

            debug!(whois_server = %whois_server, depth = depth, "Querying WHOIS server");

            let raw_response = self.query_server(whois_server, domain).await?;
            let response = WhoisResponse::parse(domain, whois_server, &raw_response);

            if let Some(referral) = extract_referral(&raw_response) {
                if referral != whois_server && !visited.contains(&referral) {
                    debug!(referral = %referral, "Following referral");
                    match self
                        .lookup_with_referrals(domain, &referral, depth + 1, visited)
                        .await
                    {
                        Ok(referred) => return Ok(merge(response, referred)),
                        // The registry answer is still usable
                        Err(e) => {
                            warn!(referral = %referral, error = %e, "Referral lookup failed");
                        }
                    }
                }
            }

            Ok(response)
        })
    }

    async fn query_server(&self, server: &str, query: &str) -> Result<String> {
        let addr = format!("{}:{}", server, WHOIS_PORT);

        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| WatchError::Timeout(format!("Connection to {} timed out", server)))?
            .map_err(|e| WatchError::Whois(format!("Failed to connect to {}: {}", server, e)))?;

        let query_bytes = format!("{}\r\n", query);
        timeout(self.timeout, stream.write_all(query_bytes.as_bytes()))
            .await
            .map_err(|_| WatchError::Timeout("Write timed out".to_string()))?
            .map_err(|e| WatchError::Whois(format!("Failed to send query: {}", e)))?;

        let mut response = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match timeout(self.timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    response.extend_from_slice(&buf[..n]);
                    if response.len() > MAX_RESPONSE_SIZE {
                        return Err(WatchError::Whois("Response too large".to_string()));
                    }
                }
                Ok(Err(e)) => {
                    return Err(WatchError::Whois(format!("Read error: {}", e)));
                }
                Err(_) => {
                    if !response.is_empty() {
                        break;
                    }
                    return Err(WatchError::Timeout("Read timed out".to_string()));
                }
            }
        }

        // Latin-1 fallback
        Ok(match String::from_utf8(response) {
            Ok(text) => text,
            Err(e) => e.into_bytes().iter().map(|&c| c as char).collect(),
        })
    }
}

/// Registrar answers are more specific, registry answers fill the gaps.
fn merge(registry: WhoisResponse, registrar: WhoisResponse) -> WhoisResponse {
    let (expiration_raw, expiration_date) = if registrar.expiration_date.is_some() {
        (registrar.expiration_raw, registrar.expiration_date)
    } else if registry.expiration_raw.is_some() {
        (registry.expiration_raw, registry.expiration_date)
    } else {
        (registrar.expiration_raw, registrar.expiration_date)
    };

    WhoisResponse {
        domain: registry.domain,
        registrar: registrar.registrar.or(registry.registrar),
        registrar_url: registrar.registrar_url.or(registry.registrar_url),
        expiration_raw,
        expiration_date,
        nameservers: if registrar.nameservers.is_empty() {
            registry.nameservers
        } else {
            registrar.nameservers
        },
        whois_server: registrar.whois_server,
        raw_response: registrar.raw_response,
    }
}

fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();

    let domain = domain
        .strip_prefix("http://")
        .or_else(|| domain.strip_prefix("https://"))
        .unwrap_or(&domain);

    let domain = domain.split('/').next().unwrap_or(domain);
    let domain = domain.strip_prefix("www.").unwrap_or(domain);

    if domain.is_empty() || !domain.contains('.') {
        return Err(WatchError::InvalidUrl(format!("Invalid domain: {}", domain)));
    }

    let valid = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(WatchError::InvalidUrl(format!("Invalid domain: {}", domain)));
    }

    Ok(domain.to_string())
}

fn extract_referral(response: &str) -> Option<String> {
    REFERRAL_PATTERNS.iter().find_map(|re| {
        let server = re.captures(response)?.get(1)?.as_str().trim().to_lowercase();
        let server = server.trim_end_matches('/').to_string();
        (!server.is_empty() && server.contains('.') && !server.contains(' ')).then_some(server)
    })
}
