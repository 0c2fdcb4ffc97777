pub mod alert;
pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod report;
pub mod retry;
pub mod service;
pub mod session;
pub mod timefmt;
pub mod validation;
pub mod whois;

pub use error::{Result, WatchError};
pub use validation::validate_url;

pub use cache::LastStatusCache;
pub use config::{Config, ConfigError};
pub use monitor::{CycleSummary, Monitor, MonitorSettings};
pub use notify::{NotificationRoute, Notifier, TelegramNotifier};
pub use probe::{DnsStatus, DomainStatus, ProbeReport, ProbeSet, Prober, SslState, SslStatus, WebsiteStatus};
pub use registry::{DisplaySettings, OwnerId, Registry, Section, Target};
pub use report::ReportFormatter;
pub use service::{SiteService, TargetStatus};
pub use session::{SessionState, Sessions};
