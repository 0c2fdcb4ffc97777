use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};

use sitewatch_core::cache::cache_key;
use sitewatch_core::{
    timefmt, DnsStatus, DomainStatus, Monitor, MonitorSettings, Notifier, OwnerId, Prober, Registry,
    SiteService, SslState, SslStatus, WatchError, WebsiteStatus,
};

/// What the fake network answers for one host.
#[derive(Clone)]
struct Answer {
    status: String,
    ssl_days: i64,
    domain_days: i64,
    a_records: Vec<String>,
}

impl Default for Answer {
    fn default() -> Self {
        Self {
            status: "200 OK".to_string(),
            ssl_days: 60,
            domain_days: 400,
            a_records: vec!["192.0.2.1".to_string()],
        }
    }
}

/// An expiry that floors to exactly `days` days for the rest of the test.
fn in_days(days: i64) -> NaiveDateTime {
    timefmt::now() + Duration::days(days) + Duration::hours(12)
}

#[derive(Default)]
struct ScriptedProber {
    answers: Mutex<HashMap<String, Answer>>,
}

impl ScriptedProber {
    fn set(&self, host: &str, answer: Answer) {
        self.answers.lock().unwrap().insert(host.to_string(), answer);
    }

    fn update(&self, host: &str, f: impl FnOnce(&mut Answer)) {
        let mut answers = self.answers.lock().unwrap();
        f(answers.entry(host.to_string()).or_default());
    }

    fn answer(&self, host: &str) -> Answer {
        self.answers.lock().unwrap().get(host).cloned().unwrap_or_default()
    }
}

fn host(url: &str) -> String {
    url.trim_start_matches("https://").trim_start_matches("http://").to_string()
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check_website(&self, url: &str) -> WebsiteStatus {
        WebsiteStatus::up(url, self.answer(&host(url)).status)
    }

    async fn check_ssl(&self, url: &str) -> SslStatus {
        SslStatus::valid(url, in_days(self.answer(&host(url)).ssl_days))
    }

    async fn check_domain(&self, host: &str) -> DomainStatus {
        DomainStatus {
            domain: host.to_string(),
            expires: Some(in_days(self.answer(host).domain_days)),
            registrar: Some("Example Registrar".to_string()),
            registrar_url: None,
            success: true,
            error: None,
        }
    }

    async fn check_dns(&self, host: &str) -> DnsStatus {
        DnsStatus {
            domain: host.to_string(),
            a_records: self.answer(host).a_records,
            success: true,
            ..DnsStatus::default()
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, owner: &OwnerId, message: &str) -> sitewatch_core::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WatchError::Notification("chat unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((owner.to_string(), message.to_string()));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    registry: Arc<Registry>,
    prober: Arc<ScriptedProber>,
    notifier: Arc<RecordingNotifier>,
    service: SiteService,
    monitor: Monitor,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new(dir.path()));
    let prober = Arc::new(ScriptedProber::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = SiteService::new(registry.clone(), prober.clone());
    let monitor = Monitor::new(
        MonitorSettings::default(),
        registry.clone(),
        prober.clone(),
        notifier.clone(),
    );
    Harness {
        _dir: dir,
        registry,
        prober,
        notifier,
        service,
        monitor,
    }
}

fn owner(id: &str) -> OwnerId {
    OwnerId::new(id).unwrap()
}

#[tokio::test]
async fn test_healthy_first_cycle_is_silent() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();

    let summary = h.monitor.run_cycle().await;
    assert_eq!(summary.owners, 1);
    assert_eq!(summary.targets, 1);
    assert_eq!(summary.notifications, 0);
    assert!(h.notifier.messages().is_empty());

    assert_eq!(cache_key(&a, "https://example.com"), "A:https://example.com");
    let (website, ssl) = h.monitor.cache().get(&a, "https://example.com").unwrap();
    assert_eq!(website.status, "200 OK");
    assert_eq!(ssl.state, SslState::Valid);

    let stored = &h.registry.load(&a).unwrap()[0];
    assert_eq!(stored.ssl_valid, Some(true));
    assert!(stored.domain_expires.is_some());
    assert!(stored.domain_last_checked.is_some());
    assert_eq!(stored.dns_a, Some(vec!["192.0.2.1".to_string()]));
}

#[tokio::test]
async fn test_outage_notifies_once() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();
    h.monitor.run_cycle().await;

    h.prober
        .update("example.com", |answer| answer.status = "503 Service Unavailable".to_string());
    h.monitor.run_cycle().await;

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "A");
    assert!(messages[0].1.starts_with("⚠️ Website issue detected!"));
    assert!(messages[0].1.contains("Status: 503 Service Unavailable"));
    let (website, _) = h.monitor.cache().get(&a, "https://example.com").unwrap();
    assert_eq!(website.status, "503 Service Unavailable");

    h.monitor.run_cycle().await;
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_ssl_expiry_walk_fires_bucket_thirty_once() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();

    h.prober.update("example.com", |answer| answer.ssl_days = 32);
    h.monitor.run_cycle().await;
    assert!(h.notifier.messages().is_empty());

    h.prober.update("example.com", |answer| answer.ssl_days = 29);
    h.monitor.run_cycle().await;
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.starts_with("⚠️ SSL expiration warning!"));
    assert!(messages[0].1.ends_with("Days left: 29"));
    assert_eq!(
        h.registry.load(&a).unwrap()[0].ssl_notifications.iter().copied().collect::<Vec<_>>(),
        vec![30]
    );

    // 20 and 10 days both still map to bucket 30, which is already recorded
    for days in [20, 10] {
        h.prober.update("example.com", |answer| answer.ssl_days = days);
        h.monitor.run_cycle().await;
    }
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_failed_delivery_is_retried() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();
    h.prober.update("example.com", |answer| answer.ssl_days = 12);

    h.notifier.failing.store(true, Ordering::SeqCst);
    let summary = h.monitor.run_cycle().await;
    assert_eq!(summary.notifications, 0);
    assert!(h.registry.load(&a).unwrap()[0].ssl_notifications.is_empty());

    h.notifier.failing.store(false, Ordering::SeqCst);
    h.monitor.run_cycle().await;
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("Days left: 12"));
}

#[tokio::test]
async fn test_owners_are_independent() {
    let h = harness();
    let a = owner("A");
    let b = owner("B");
    h.service.add_target(&a, "https://example.com").unwrap();
    h.service.add_target(&b, "https://example.com").unwrap();
    h.prober.update("example.com", |answer| answer.domain_days = 20);

    h.monitor.run_cycle().await;
    let owners: Vec<String> = h.notifier.messages().into_iter().map(|(o, _)| o).collect();
    assert_eq!(owners.len(), 2);
    assert!(owners.contains(&"A".to_string()));
    assert!(owners.contains(&"B".to_string()));

    // Resetting one owner's history leaves the other's file alone
    h.registry
        .update(&a, |targets| {
            targets[0].domain_notifications.clear();
            Ok(())
        })
        .unwrap();
    assert_eq!(
        h.registry.load(&b).unwrap()[0].domain_notifications.iter().copied().collect::<Vec<_>>(),
        vec![30]
    );

    h.service.remove_target(&b, "https://example.com").unwrap();
    h.notifier.clear();
    h.monitor.run_cycle().await;
    let messages = h.notifier.messages();
    // Owner A had its history cleared; its WHOIS result is stored, so the
    // warning is recomputed without a new lookup
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "A");
}

#[tokio::test]
async fn test_dns_change_is_reported() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();
    h.monitor.run_cycle().await;

    h.prober
        .update("example.com", |answer| answer.a_records = vec!["192.0.2.99".to_string()]);
    // Within the recheck interval the snapshot is not refreshed
    h.monitor.run_cycle().await;
    assert!(h.notifier.messages().is_empty());

    h.registry
        .update(&a, |targets| {
            targets[0].dns_last_checked = None;
            Ok(())
        })
        .unwrap();
    h.monitor.run_cycle().await;

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].1,
        "⚠️ DNS records changed!\nURL: https://example.com\nA: 192.0.2.1 -> 192.0.2.99"
    );
    assert_eq!(
        h.registry.load(&a).unwrap()[0].dns_a,
        Some(vec!["192.0.2.99".to_string()])
    );
}

#[tokio::test]
async fn test_user_edits_survive_a_cycle() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();
    h.prober.set("example.org", Answer::default());

    h.monitor.run_cycle().await;
    h.service.add_target(&a, "https://example.org").unwrap();
    h.service
        .toggle_setting(&a, "https://example.com", sitewatch_core::Section::Dns)
        .unwrap();
    h.monitor.run_cycle().await;

    let stored = h.registry.load(&a).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(!stored[0].settings.show_dns);
    assert!(stored[1].ssl_expires.is_some());
}

#[tokio::test]
async fn test_dns_change_seen_by_status_is_still_reported() {
    let h = harness();
    let a = owner("A");
    h.service.add_target(&a, "https://example.com").unwrap();
    h.monitor.run_cycle().await;

    h.prober
        .update("example.com", |answer| answer.a_records = vec!["192.0.2.99".to_string()]);
    let statuses = h.service.get_status(&a).await.unwrap();
    assert_eq!(statuses[0].target.dns_a, Some(vec!["192.0.2.99".to_string()]));
    assert_eq!(
        h.registry.load(&a).unwrap()[0].dns_a,
        Some(vec!["192.0.2.1".to_string()])
    );
    assert!(h.notifier.messages().is_empty());

    h.registry
        .update(&a, |targets| {
            targets[0].dns_last_checked = None;
            Ok(())
        })
        .unwrap();
    h.monitor.run_cycle().await;

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.starts_with("⚠️ DNS records changed!"));
    assert!(messages[0].1.ends_with("A: 192.0.2.1 -> 192.0.2.99"));
}

/// Panics while checking one host and answers normally for the rest.
struct PanicsOn {
    host: &'static str,
    inner: ScriptedProber,
}

#[async_trait]
impl Prober for PanicsOn {
    async fn check_website(&self, url: &str) -> WebsiteStatus {
        if host(url) == self.host {
            panic!("resolver blew up for {}", url);
        }
        self.inner.check_website(url).await
    }

    async fn check_ssl(&self, url: &str) -> SslStatus {
        self.inner.check_ssl(url).await
    }

    async fn check_domain(&self, host: &str) -> DomainStatus {
        self.inner.check_domain(host).await
    }

    async fn check_dns(&self, host: &str) -> DnsStatus {
        self.inner.check_dns(host).await
    }
}

#[tokio::test]
async fn test_aborted_target_does_not_stop_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new(dir.path()));
    let prober = Arc::new(PanicsOn {
        host: "broken.example",
        inner: ScriptedProber::default(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let service = SiteService::new(registry.clone(), prober.clone());
    let monitor = Monitor::new(
        MonitorSettings::default(),
        registry.clone(),
        prober,
        notifier.clone(),
    );

    let a = owner("A");
    service.add_target(&a, "https://example.com").unwrap();
    service.add_target(&a, "https://broken.example").unwrap();

    let summary = monitor.run_cycle().await;
    assert_eq!(summary.targets, 2);
    assert_eq!(summary.failures, 1);
    assert!(notifier.messages().is_empty());

    let stored = registry.load(&a).unwrap();
    assert_eq!(stored.len(), 2);
    let healthy = stored.iter().find(|t| t.url == "https://example.com").unwrap();
    assert_eq!(healthy.ssl_valid, Some(true));
    assert_eq!(healthy.dns_a, Some(vec!["192.0.2.1".to_string()]));

    let broken = stored.iter().find(|t| t.url == "https://broken.example").unwrap();
    assert_eq!(broken.ssl_valid, None);
    assert_eq!(broken.ssl_expires, None);
    assert_eq!(broken.domain_last_checked, None);
    assert_eq!(broken.dns_last_checked, None);
    assert!(broken.ssl_notifications.is_empty());
}
