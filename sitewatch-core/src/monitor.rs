//! The periodic check loop.
//!
//! Every cycle walks all owners, probes each of their targets, sends the
//! alerts that are due and writes the owner's list back once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::alert::{self, ExpiryKind};
use crate::cache::LastStatusCache;
use crate::config::{Config, DEFAULT_MAX_CONCURRENT_CHECKS};
use crate::notify::Notifier;
use crate::probe::{DnsStatus, DomainStatus, ProbeReport, Prober, SslState, SslStatus};
use crate::registry::{OwnerId, Registry, Target};
use crate::timefmt;
use crate::validation::host_of;

/// WHOIS and DNS are rechecked at most this often per target.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub ssl_thresholds: Vec<i64>,
    pub domain_thresholds: Vec<i64>,
    pub max_concurrent_checks: usize,
    pub recheck_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(crate::config::DEFAULT_CHECK_INTERVAL_SECS),
            ssl_thresholds: vec![30, 15, 7, 1],
            domain_thresholds: vec![30, 15, 7, 1],
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            recheck_interval: RECHECK_INTERVAL,
        }
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            check_interval: config.check_interval,
            ssl_thresholds: config.ssl_thresholds.clone(),
            domain_thresholds: config.domain_thresholds.clone(),
            max_concurrent_checks: config.max_concurrent_checks,
            recheck_interval: RECHECK_INTERVAL,
        }
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub owners: usize,
    pub targets: usize,
    pub notifications: usize,
    /// Targets whose check panicked, and owners whose list failed to load or save
    pub failures: usize,
}

/// Result of checking one target.
#[derive(Debug, Clone)]
pub struct TargetCheck {
    pub target: Target,
    pub report: ProbeReport,
    pub notifications: usize,
}

#[derive(Clone)]
pub struct Monitor {
    settings: Arc<MonitorSettings>,
    registry: Arc<Registry>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<LastStatusCache>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        registry: Arc<Registry>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            prober,
            notifier,
            cache: Arc::new(LastStatusCache::new()),
        }
    }

    pub fn cache(&self) -> &LastStatusCache {
        &self.cache
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// A cycle in progress is finished first; the wait between cycles is cut
    /// short.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            interval_secs = self.settings.check_interval.as_secs(),
            ssl_thresholds = ?self.settings.ssl_thresholds,
            domain_thresholds = ?self.settings.domain_thresholds,
            "Starting monitor loop"
        );

        loop {
            let summary = self.run_cycle().await;
            info!(
                owners = summary.owners,
                targets = summary.targets,
                notifications = summary.notifications,
                failures = summary.failures,
                sleep_secs = self.settings.check_interval.as_secs(),
                "Check cycle completed"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping monitor loop");
                    return;
                }
            }
        }
    }

    /// One pass over every owner.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let owners = match self.registry.owners() {
            Ok(owners) => owners,
            Err(e) => {
                error!(error = %e, "Failed to enumerate owners");
                summary.failures += 1;
                return summary;
            }
        };

        info!(owners = owners.len(), "Starting check cycle");
        for owner in owners {
            summary.owners += 1;
            self.check_owner(&owner, &mut summary).await;
        }
        summary
    }

    #[instrument(skip(self, summary), fields(owner = %owner))]
    async fn check_owner(&self, owner: &OwnerId, summary: &mut CycleSummary) {
        let targets = match self.registry.load(owner) {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "Skipping owner with unreadable registry");
                summary.failures += 1;
                return;
            }
        };
        if targets.is_empty() {
            return;
        }

        let now = timefmt::now();
        let results: Vec<(Target, Option<TargetCheck>)> = stream::iter(targets)
            .map(|target| {
                let monitor = self.clone();
                let owner = owner.clone();
                let original = target.clone();
                async move {
                    let handle =
                        tokio::spawn(async move { monitor.check_target(&owner, target, now).await });
                    match handle.await {
                        Ok(check) => (original, Some(check)),
                        Err(e) => {
                            error!(url = %original.url, error = %e, "Target check aborted");
                            (original, None)
                        }
                    }
                }
            })
            .buffer_unordered(self.settings.max_concurrent_checks.max(1))
            .collect()
            .await;

        let mut checked: HashMap<String, Target> = HashMap::new();
        for (original, check) in results {
            summary.targets += 1;
            match check {
                Some(check) => {
                    summary.notifications += check.notifications;
                    checked.insert(original.url.clone(), check.target);
                }
                None => summary.failures += 1,
            }
        }

        let saved = self.registry.update(owner, |current| {
            for target in current.iter_mut() {
                if let Some(fresh) = checked.get(&target.url) {
                    target.absorb_checks(fresh);
                }
            }
            Ok(())
        });
        if let Err(e) = saved {
            // The next cycle probes again and retries the write
            error!(error = %e, "Failed to save registry");
            summary.failures += 1;
        }
    }

    /// Probe one target, send what is due and return the updated target.
    #[instrument(skip(self, target, now), fields(owner = %owner, url = %target.url))]
    pub async fn check_target(
        &self,
        owner: &OwnerId,
        mut target: Target,
        now: NaiveDateTime,
    ) -> TargetCheck {
        let whois_due = is_due(target.domain_last_checked_at(), now, self.settings.recheck_interval);
        let dns_due = is_due(target.dns_last_checked_at(), now, self.settings.recheck_interval);

        let report = collect(self.prober.as_ref(), &target.url, whois_due, dns_due).await;
        let mut sent = 0;

        apply_ssl(&mut target, &report.ssl);
        if let Some(due) = alert::expiry_alert(
            ExpiryKind::Ssl,
            &target.url,
            target.ssl_expires_at(),
            &target.ssl_notifications,
            &self.settings.ssl_thresholds,
            now,
        ) {
            if self.deliver(owner, &due.message).await {
                info!(bucket = due.bucket, days_left = due.days_left, "SSL expiry warning sent");
                target.ssl_notifications.insert(due.bucket);
                sent += 1;
            }
        }

        if let Some(domain) = &report.domain {
            apply_domain(&mut target, domain, now);
        }
        if let Some(due) = alert::expiry_alert(
            ExpiryKind::Domain,
            &target.url,
            target.domain_expires_at(),
            &target.domain_notifications,
            &self.settings.domain_thresholds,
            now,
        ) {
            if self.deliver(owner, &due.message).await {
                info!(bucket = due.bucket, days_left = due.days_left, "Domain expiry warning sent");
                target.domain_notifications.insert(due.bucket);
                sent += 1;
            }
        }

        if let Some(dns) = &report.dns {
            let mut record = true;
            if alert::dns_changed(&target, dns) {
                let message = alert::dns_change_message(&target.url, &target, dns);
                if self.deliver(owner, &message).await {
                    info!("DNS change notification sent");
                    sent += 1;
                } else {
                    // Keep the old snapshot so the change is reported next cycle
                    record = false;
                }
            }
            if record {
                apply_dns(&mut target, dns, now);
            }
        }

        let pair = (report.website.clone(), report.ssl.clone());
        if self.cache.has_changed(owner, &target.url, &pair) {
            let messages = alert::incident_messages(&target.url, &report.website, &report.ssl);
            let mut delivered = true;
            for message in &messages {
                if self.deliver(owner, message).await {
                    sent += 1;
                } else {
                    delivered = false;
                }
            }
            if !messages.is_empty() {
                warn!(
                    status = %report.website.status,
                    ssl = %report.ssl.state,
                    delivered,
                    "Incident detected"
                );
            }
            if delivered {
                self.cache.insert(owner, &target.url, pair);
            }
        }

        TargetCheck {
            target,
            report,
            notifications: sent,
        }
    }

    async fn deliver(&self, owner: &OwnerId, message: &str) -> bool {
        match self.notifier.notify(owner, message).await {
            Ok(()) => true,
            Err(e) => {
                error!(owner = %owner, error = %e, "Failed to send notification");
                false
            }
        }
    }
}

/// Whether a check last run at `last` should run again at `now`. Unset or
/// unparsable timestamps are always due.
pub fn is_due(last: Option<NaiveDateTime>, now: NaiveDateTime, every: Duration) -> bool {
    match last {
        Some(last) => match chrono::Duration::from_std(every) {
            Ok(every) => now - last >= every,
            Err(_) => true,
        },
        None => true,
    }
}

/// Run the probes for `url` concurrently. HTTP and TLS always run; WHOIS and
/// DNS only when asked for.
pub async fn collect(prober: &dyn Prober, url: &str, whois: bool, dns: bool) -> ProbeReport {
    let host = host_of(url);

    let domain_probe = async {
        match (&host, whois) {
            (Some(host), true) => Some(prober.check_domain(host).await),
            _ => None,
        }
    };
    let dns_probe = async {
        match (&host, dns) {
            (Some(host), true) => Some(prober.check_dns(host).await),
            _ => None,
        }
    };

    let (website, ssl, domain, dns) = tokio::join!(
        prober.check_website(url),
        prober.check_ssl(url),
        domain_probe,
        dns_probe
    );
    debug!(url = %url, status = %website.status, ssl = %ssl.state, "Probes finished");

    ProbeReport {
        website,
        ssl,
        domain,
        dns,
    }
}

pub fn apply_ssl(target: &mut Target, ssl: &SslStatus) {
    target.ssl_valid = Some(ssl.state == SslState::Valid);
    target.ssl_expires = ssl.expires.as_ref().map(timefmt::format);
}

/// A failed lookup still counts as a check but keeps the known expiry.
pub fn apply_domain(target: &mut Target, domain: &DomainStatus, now: NaiveDateTime) {
    target.domain_last_checked = Some(timefmt::format(&now));
    if domain.success {
        target.domain_expires = domain.expires.as_ref().map(timefmt::format);
    } else {
        warn!(
            url = %target.url,
            error = domain.error.as_deref().unwrap_or("unknown"),
            "Domain expiration check failed"
        );
    }
}

/// A failed snapshot still counts as a check but keeps the stored records.
pub fn apply_dns(target: &mut Target, dns: &DnsStatus, now: NaiveDateTime) {
    target.dns_last_checked = Some(timefmt::format(&now));
    if dns.success {
        target.dns_a = Some(dns.a_records.clone());
        target.dns_mx = Some(dns.mx_records.clone());
        target.dns_other = Some(dns.other_records.clone());
    } else {
        warn!(
            url = %target.url,
            error = dns.error.as_deref().unwrap_or("unknown"),
            "DNS snapshot failed"
        );
    }
}
