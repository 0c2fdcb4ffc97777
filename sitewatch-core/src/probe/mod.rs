//! The four independent target checks
//!
//! - HTTP reachability (with transport retries)
//! - TLS certificate validity and expiry
//! - Domain registration expiry via WHOIS
//! - DNS record snapshot from the authoritative nameservers
//!
//! None of the probes return errors: every failure is folded into the
//! result record so a misbehaving probe can never abort a monitor cycle.

mod http;
mod tls;
mod types;

pub use http::{status_line, HttpProbe};
pub use tls::{extract_validity_from_der, TlsProbe, DEFAULT_TLS_PORT};
pub use types::{DnsStatus, DomainStatus, ProbeReport, SslState, SslStatus, WebsiteStatus};

use async_trait::async_trait;
use url::Url;

use crate::dns::{DnsResolver, RecordType};
use crate::error::Result;
use crate::validation::host_of;
use crate::whois::WhoisClient;

/// Runs checks against one target.
///
/// The monitor loop and the command front-end only talk to this trait, so
/// alternative probe backends can be plugged in.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check_website(&self, url: &str) -> WebsiteStatus;
    async fn check_ssl(&self, url: &str) -> SslStatus;
    async fn check_domain(&self, host: &str) -> DomainStatus;
    async fn check_dns(&self, host: &str) -> DnsStatus;
}

/// The network-backed probe set.
#[derive(Debug, Clone)]
pub struct ProbeSet {
    http: HttpProbe,
    tls: TlsProbe,
    whois: WhoisClient,
    dns: DnsResolver,
    dns_record_types: Vec<RecordType>,
}

impl ProbeSet {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpProbe::new()?,
            tls: TlsProbe::new(),
            whois: WhoisClient::new(),
            dns: DnsResolver::new(),
            dns_record_types: vec![RecordType::A, RecordType::MX],
        })
    }

    /// Record types captured by the DNS snapshot (default A and MX).
    pub fn with_dns_record_types(mut self, types: Vec<RecordType>) -> Self {
        self.dns_record_types = types;
        self
    }
}

#[async_trait]
impl Prober for ProbeSet {
    async fn check_website(&self, url: &str) -> WebsiteStatus {
        self.http.check(url).await
    }

    async fn check_ssl(&self, url: &str) -> SslStatus {
        let parsed = Url::parse(url).ok();
        let host = host_of(url);
        match host {
            Some(host) => {
                let port = parsed
                    .and_then(|u| u.port())
                    .unwrap_or(DEFAULT_TLS_PORT);
                self.tls.check(&host, port).await
            }
            None => SslStatus::invalid(url, "Invalid URL"),
        }
    }

    async fn check_domain(&self, host: &str) -> DomainStatus {
        self.whois.check_expiration(host).await
    }

    async fn check_dns(&self, host: &str) -> DnsStatus {
        self.dns.snapshot(host, &self.dns_record_types).await
    }
}
