use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::records::RecordType;
use crate::error::{Result, WatchError};
use crate::probe::DnsStatus;
use crate::validation::is_blocked_host;

/// Per-query timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for one record type, retries included.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(10);

/// Used when the authoritative nameservers cannot be determined.
const FALLBACK_NAMESERVERS: [Ipv4Addr; 2] = [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)];

/// DNS resolver that snapshots a domain's records.
///
/// Records are read from the domain's own nameservers so that a change is
/// visible as soon as the zone is updated, not when caches expire.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    timeout: Duration,
    lifetime: Duration,
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsResolver {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            lifetime: DEFAULT_LIFETIME,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, lifetime: Duration) -> Self {
        self.timeout = timeout;
        self.lifetime = lifetime;
        self
    }

    fn create_resolver(&self, nameservers: &[IpAddr]) -> Result<TokioAsyncResolver> {
        if nameservers.is_empty() {
            return Err(WatchError::Dns("no nameservers to query".to_string()));
        }

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 2;
        opts.use_hosts_file = false;

        let mut config = ResolverConfig::new();
        for ip in nameservers {
            config.add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
        }

        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    /// Snapshot `types` for `domain`.
    ///
    /// A failing record type yields an empty list for that type only; the
    /// snapshot as a whole fails only when no resolver can be built.
    #[instrument(skip(self, types), fields(domain = %domain))]
    pub async fn snapshot(&self, domain: &str, types: &[RecordType]) -> DnsStatus {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();

        if domain.is_empty() || is_blocked_host(&domain) {
            warn!("Refusing DNS snapshot of private or loopback host");
            return DnsStatus::failed(&domain, "Private or loopback host");
        }

        let nameservers = self.authoritative_nameservers(&domain).await;
        let resolver = match self.create_resolver(&nameservers) {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "Could not build DNS resolver");
                return DnsStatus::failed(&domain, e.to_string());
            }
        };

        let mut status = DnsStatus {
            domain: domain.clone(),
            success: true,
            ..DnsStatus::default()
        };

        for record_type in types {
            let records = match self.query(&resolver, &domain, *record_type).await {
                Ok(records) => records,
                Err(e) => {
                    debug!(record_type = %record_type, error = %e, "No records");
                    Vec::new()
                }
            };

            match record_type {
                RecordType::A => status.a_records = records,
                RecordType::MX => status.mx_records = records,
                other => {
                    status.other_records.insert(other.map_key(), records);
                }
            }
        }

        info!(
            a = status.a_records.len(),
            mx = status.mx_records.len(),
            "DNS snapshot completed"
        );
        status
    }

    /// IPv4 addresses of the domain's NS hosts, or the public fallback pair.
    async fn authoritative_nameservers(&self, domain: &str) -> Vec<IpAddr> {
        let fallback: Vec<IpAddr> = FALLBACK_NAMESERVERS.iter().copied().map(IpAddr::V4).collect();

        let bootstrap = match self.create_resolver(&fallback) {
            Ok(resolver) => resolver,
            Err(_) => return fallback,
        };

        let ns_names = match timeout(self.lifetime, bootstrap.ns_lookup(domain)).await {
            Ok(Ok(response)) => response.iter().map(|ns| ns.0.to_string()).collect::<Vec<_>>(),
            Ok(Err(e)) => {
                debug!(error = %e, "NS lookup failed, using fallback resolvers");
                return fallback;
            }
            Err(_) => {
                debug!("NS lookup timed out, using fallback resolvers");
                return fallback;
            }
        };

        let mut addresses = Vec::new();
        for name in &ns_names {
            if let Ok(Ok(response)) = timeout(self.lifetime, bootstrap.ipv4_lookup(name.as_str())).await {
                addresses.extend(response.iter().map(|a| IpAddr::V4(a.0)));
            }
        }

        if addresses.is_empty() {
            debug!("No nameserver addresses resolved, using fallback resolvers");
            return fallback;
        }

        debug!(nameservers = ?addresses, "Using authoritative nameservers");
        addresses
    }

    async fn query(
        &self,
        resolver: &TokioAsyncResolver,
        domain: &str,
        record_type: RecordType,
    ) -> Result<Vec<String>> {
        let mut records = timeout(self.lifetime, lookup_records(resolver, domain, record_type))
            .await
            .map_err(|_| WatchError::Timeout(format!("{} lookup timed out", record_type)))??;

        records.sort();
        Ok(records)
    }
}

async fn lookup_records(
    resolver: &TokioAsyncResolver,
    domain: &str,
    record_type: RecordType,
) -> Result<Vec<String>> {
    match record_type {
        RecordType::A => {
            let response = resolver
                .ipv4_lookup(domain)
                .await
                .map_err(|e| WatchError::Dns(format!("A lookup failed: {}", e)))?;
            Ok(response.iter().map(|a| a.0.to_string()).collect())
        }
        RecordType::MX => {
            let response = resolver
                .mx_lookup(domain)
                .await
                .map_err(|e| WatchError::Dns(format!("MX lookup failed: {}", e)))?;
            Ok(response
                .iter()
                .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                .collect())
        }
        other => {
            let response = resolver
                .lookup(domain, other.into())
                .await
                .map_err(|e| WatchError::Dns(format!("{} lookup failed: {}", other, e)))?;
            Ok(response.iter().map(|rdata| rdata.to_string()).collect())
        }
    }
}
