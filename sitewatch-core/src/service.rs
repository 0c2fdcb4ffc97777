//! Operations behind the user-facing commands.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument};

use crate::alert;
use crate::config::DEFAULT_MAX_CONCURRENT_CHECKS;
use crate::error::{Result, WatchError};
use crate::monitor::{apply_dns, apply_domain, apply_ssl, collect};
use crate::probe::{ProbeReport, Prober};
use crate::registry::{DisplaySettings, OwnerId, Registry, Section, Target};
use crate::timefmt;
use crate::validation::validate_url;

/// A target together with a fresh probe run.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: Target,
    pub report: ProbeReport,
}

#[derive(Clone)]
pub struct SiteService {
    registry: Arc<Registry>,
    prober: Arc<dyn Prober>,
    max_concurrent_checks: usize,
}

impl SiteService {
    pub fn new(registry: Arc<Registry>, prober: Arc<dyn Prober>) -> Self {
        Self {
            registry,
            prober,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrent_checks = concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validate `raw_url` and start monitoring it. Returns the stored URL.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn add_target(&self, owner: &OwnerId, raw_url: &str) -> Result<String> {
        let url = validate_url(raw_url)?;
        self.registry.update(owner, |targets| {
            if targets.iter().any(|t| t.url == url) {
                return Err(WatchError::AlreadyMonitored(url.clone()));
            }
            targets.push(Target::new(url.clone()));
            Ok(())
        })?;
        info!(url = %url, "Target added");
        Ok(url)
    }

    /// Stop monitoring a URL. Returns the removed URL.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn remove_target(&self, owner: &OwnerId, raw_url: &str) -> Result<String> {
        let wanted = match validate_url(raw_url) {
            Ok(url) => url,
            // Entries written before validation existed are matched verbatim
            Err(_) => raw_url.trim().to_string(),
        };

        let removed = self.registry.update(owner, |targets| {
            let index = targets
                .iter()
                .position(|t| t.url == wanted)
                .ok_or_else(|| WatchError::NotMonitored(wanted.clone()))?;
            Ok(targets.remove(index).url)
        })?;
        info!(url = %removed, "Target removed");
        Ok(removed)
    }

    pub fn list_targets(&self, owner: &OwnerId) -> Result<Vec<Target>> {
        self.registry.load(owner)
    }

    /// Probe every target of `owner` now, WHOIS included, and store the
    /// results. Sends nothing and leaves notification history alone.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn get_status(&self, owner: &OwnerId) -> Result<Vec<TargetStatus>> {
        let targets = self.registry.load(owner)?;
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let now = timefmt::now();
        let prober = self.prober.as_ref();
        let checked: Vec<(Target, TargetStatus)> = stream::iter(targets)
            .map(|mut target| async move {
                let report = collect(prober, &target.url, true, true).await;
                apply_ssl(&mut target, &report.ssl);
                if let Some(domain) = &report.domain {
                    apply_domain(&mut target, domain, now);
                }

                let mut shown = target.clone();
                if let Some(dns) = &report.dns {
                    apply_dns(&mut shown, dns, now);
                    // A changed snapshot stays unstored so the monitor reports it
                    if !alert::dns_changed(&target, dns) {
                        apply_dns(&mut target, dns, now);
                    }
                }
                (target, TargetStatus { target: shown, report })
            })
            .buffered(self.max_concurrent_checks)
            .collect()
            .await;

        let fresh: HashMap<&str, &Target> = checked
            .iter()
            .map(|(target, _)| (target.url.as_str(), target))
            .collect();
        self.registry.update(owner, |current| {
            for target in current.iter_mut() {
                if let Some(checked_target) = fresh.get(target.url.as_str()) {
                    target.absorb_results(checked_target);
                }
            }
            Ok(())
        })?;

        let statuses: Vec<TargetStatus> = checked.into_iter().map(|(_, status)| status).collect();
        info!(targets = statuses.len(), "Status report built");
        Ok(statuses)
    }

    /// Flip one report section for one target and return the new settings.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn toggle_setting(&self, owner: &OwnerId, raw_url: &str, section: Section) -> Result<DisplaySettings> {
        let url = validate_url(raw_url).unwrap_or_else(|_| raw_url.trim().to_string());
        let settings = self.registry.update(owner, |targets| {
            let target = targets
                .iter_mut()
                .find(|t| t.url == url)
                .ok_or_else(|| WatchError::NotMonitored(url.clone()))?;
            target.settings.toggle(section);
            Ok(target.settings)
        })?;
        info!(url = %url, section = %section, shown = settings.is_shown(section), "Display setting toggled");
        Ok(settings)
    }

    /// Forget every target of `owner`.
    pub fn delete_owner(&self, owner: &OwnerId) -> Result<bool> {
        self.registry.delete(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{DnsStatus, DomainStatus, SslStatus, WebsiteStatus};
    use async_trait::async_trait;

    struct StaticProber;

    #[async_trait]
    impl Prober for StaticProber {
        async fn check_website(&self, url: &str) -> WebsiteStatus {
            WebsiteStatus::up(url, "200 OK")
        }
        async fn check_ssl(&self, url: &str) -> SslStatus {
            SslStatus::valid(url, timefmt::parse("2031-01-01 00:00:00").unwrap())
        }
        async fn check_domain(&self, host: &str) -> DomainStatus {
            DomainStatus {
                domain: host.to_string(),
                expires: timefmt::parse("2032-01-01 00:00:00"),
                registrar: Some("Registrar Inc".to_string()),
                registrar_url: Some("https://registrar.example".to_string()),
                success: true,
                error: None,
            }
        }
        async fn check_dns(&self, host: &str) -> DnsStatus {
            DnsStatus {
                domain: host.to_string(),
                a_records: vec!["192.0.2.10".to_string()],
                success: true,
                ..DnsStatus::default()
            }
        }
    }

    fn service(dir: &tempfile::TempDir) -> SiteService {
        SiteService::new(Arc::new(Registry::new(dir.path())), Arc::new(StaticProber))
    }

    fn owner() -> OwnerId {
        OwnerId::new("100").unwrap()
    }

    #[test]
    fn test_add_normalizes_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        assert_eq!(svc.add_target(&owner(), " https://Example.com/ ").unwrap(), "https://example.com");
        let err = svc.add_target(&owner(), "https://example.com").unwrap_err();
        assert!(matches!(err, WatchError::AlreadyMonitored(_)));
        assert!(matches!(
            svc.add_target(&owner(), "http://127.0.0.1"),
            Err(WatchError::InvalidUrl(_))
        ));
        assert_eq!(svc.list_targets(&owner()).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_target() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        svc.add_target(&owner(), "https://a.com").unwrap();

        assert!(matches!(
            svc.remove_target(&owner(), "https://b.com"),
            Err(WatchError::NotMonitored(_))
        ));
        assert_eq!(svc.remove_target(&owner(), "https://a.com/").unwrap(), "https://a.com");
        assert!(svc.list_targets(&owner()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_status_probes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        svc.add_target(&owner(), "https://a.com").unwrap();
        svc.add_target(&owner(), "https://b.com").unwrap();

        let statuses = svc.get_status(&owner()).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].target.url, "https://a.com");
        assert_eq!(
            statuses[0].report.domain.as_ref().and_then(|d| d.registrar.as_deref()),
            Some("Registrar Inc")
        );

        let stored = svc.list_targets(&owner()).unwrap();
        assert_eq!(stored[1].domain_expires.as_deref(), Some("2032-01-01 00:00:00"));
        assert_eq!(stored[1].ssl_expires.as_deref(), Some("2031-01-01 00:00:00"));
        assert_eq!(stored[1].dns_a, Some(vec!["192.0.2.10".to_string()]));
        assert!(stored[1].ssl_notifications.is_empty());
    }

    #[test]
    fn test_toggle_setting() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        svc.add_target(&owner(), "https://a.com").unwrap();

        let settings = svc.toggle_setting(&owner(), "https://a.com", Section::Ssl).unwrap();
        assert!(!settings.show_ssl);
        assert!(!svc.list_targets(&owner()).unwrap()[0].settings.show_ssl);

        assert!(matches!(
            svc.toggle_setting(&owner(), "https://zzz.com", Section::Dns),
            Err(WatchError::NotMonitored(_))
        ));
    }

    #[test]
    fn test_owners_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let other = OwnerId::new("200").unwrap();

        svc.add_target(&owner(), "https://a.com").unwrap();
        svc.add_target(&other, "https://a.com").unwrap();
        svc.toggle_setting(&owner(), "https://a.com", Section::Domain).unwrap();

        assert!(svc.list_targets(&other).unwrap()[0].settings.show_domain);
        assert!(svc.delete_owner(&owner()).unwrap());
        assert_eq!(svc.list_targets(&other).unwrap().len(), 1);
    }

    /// Records an SSL alert for the target while its status is being
    /// collected, the way a concurrent monitor cycle would.
    struct AlertingMidCheck {
        registry: Arc<Registry>,
        owner: OwnerId,
    }

    #[async_trait]
    impl Prober for AlertingMidCheck {
        async fn check_website(&self, url: &str) -> WebsiteStatus {
            self.registry
                .update(&self.owner, |targets| {
                    for target in targets.iter_mut() {
                        target.ssl_notifications.insert(30);
                    }
                    Ok(())
                })
                .unwrap();
            StaticProber.check_website(url).await
        }
        async fn check_ssl(&self, url: &str) -> SslStatus {
            StaticProber.check_ssl(url).await
        }
        async fn check_domain(&self, host: &str) -> DomainStatus {
            StaticProber.check_domain(host).await
        }
        async fn check_dns(&self, host: &str) -> DnsStatus {
            StaticProber.check_dns(host).await
        }
    }

    #[tokio::test]
    async fn test_get_status_keeps_alerts_recorded_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path()));
        let prober = AlertingMidCheck {
            registry: registry.clone(),
            owner: owner(),
        };
        let svc = SiteService::new(registry.clone(), Arc::new(prober));
        svc.add_target(&owner(), "https://a.com").unwrap();

        svc.get_status(&owner()).await.unwrap();

        let stored = registry.load(&owner()).unwrap();
        assert!(stored[0].ssl_notifications.contains(&30));
        assert_eq!(stored[0].ssl_expires.as_deref(), Some("2031-01-01 00:00:00"));
    }

    #[tokio::test]
    async fn test_get_status_leaves_dns_change_unstored() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        svc.add_target(&owner(), "https://a.com").unwrap();
        svc.registry
            .update(&owner(), |targets| {
                targets[0].dns_a = Some(vec!["192.0.2.1".to_string()]);
                Ok(())
            })
            .unwrap();

        let statuses = svc.get_status(&owner()).await.unwrap();
        assert_eq!(statuses[0].target.dns_a, Some(vec!["192.0.2.10".to_string()]));

        let stored = svc.list_targets(&owner()).unwrap();
        assert_eq!(stored[0].dns_a, Some(vec!["192.0.2.1".to_string()]));
        assert!(stored[0].dns_last_checked.is_none());
        assert_eq!(stored[0].ssl_expires.as_deref(), Some("2031-01-01 00:00:00"));
    }
}
