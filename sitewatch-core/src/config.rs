//! Process configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::notify::NotificationRoute;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_THRESHOLDS: &str = "30,15,7,1";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Validated, immutable settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bot_token: String,
    pub check_interval: Duration,
    pub ssl_thresholds: Vec<i64>,
    pub domain_thresholds: Vec<i64>,
    pub route: NotificationRoute,
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub max_concurrent_checks: usize,
    pub telegram_api_url: String,
}

impl Config {
    /// Read `.env` (when present) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; values are cleaned before parsing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| clean_value(&v)).filter(|v| !v.is_empty());

        let bot_token = get("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let check_interval = match get("CHECK_INTERVAL") {
            Some(raw) => Duration::from_secs(parse_positive::<u64>("CHECK_INTERVAL", &raw)?),
            None => Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        };

        let ssl_thresholds = parse_thresholds(
            "SSL_EXPIRY_THRESHOLD",
            get("SSL_EXPIRY_THRESHOLD").as_deref().unwrap_or(DEFAULT_THRESHOLDS),
        )?;
        let domain_thresholds = parse_thresholds(
            "DOMAIN_EXPIRY_THRESHOLD",
            get("DOMAIN_EXPIRY_THRESHOLD").as_deref().unwrap_or(DEFAULT_THRESHOLDS),
        )?;

        let topic_id = get("TOPIC_ID")
            .map(|raw| parse_int::<i64>("TOPIC_ID", &raw))
            .transpose()?;
        let user_id = get("USER_ID")
            .map(|raw| parse_int::<i64>("USER_ID", &raw))
            .transpose()?;

        let mode = get("NOTIFICATION_MODE").unwrap_or_else(|| "group".to_string());
        let route = match mode.to_lowercase().as_str() {
            "group" => NotificationRoute::Group {
                chat_id: get("GROUP_ID").ok_or(ConfigError::Missing("GROUP_ID"))?,
                topic_id,
            },
            "user" => NotificationRoute::User {
                user_id: user_id.ok_or(ConfigError::Missing("USER_ID"))?,
            },
            "owner" => NotificationRoute::Owner,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "NOTIFICATION_MODE",
                    value: mode,
                    reason: "expected group, user or owner".to_string(),
                })
            }
        };

        let max_concurrent_checks = match get("MAX_CONCURRENT_CHECKS") {
            Some(raw) => parse_positive::<usize>("MAX_CONCURRENT_CHECKS", &raw)?,
            None => DEFAULT_MAX_CONCURRENT_CHECKS,
        };

        Ok(Self {
            bot_token,
            check_interval,
            ssl_thresholds,
            domain_thresholds,
            route,
            data_dir: data_dir_from_lookup(&lookup),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            max_concurrent_checks,
            telegram_api_url: get("TELEGRAM_API_URL")
                .unwrap_or_else(|| crate::notify::DEFAULT_API_URL.to_string()),
        })
    }
}

fn load_dotenv() {
    match dotenv::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
        Err(e) => debug!(error = %e, "No .env file loaded"),
    }
}

/// `DATA_DIR` alone, for commands that never talk to Telegram.
pub fn data_dir_from_env() -> PathBuf {
    load_dotenv();
    data_dir_from_lookup(|key| std::env::var(key).ok())
}

pub fn data_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("DATA_DIR")
        .map(|v| clean_value(&v))
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Drop a trailing `# comment` and surrounding whitespace or quotes.
fn clean_value(raw: &str) -> String {
    let value = raw.split('#').next().unwrap_or_default().trim();
    value.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

fn parse_int<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: "expected an integer".to_string(),
    })
}

fn parse_positive<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = parse_int::<T>(name, raw)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Comma-separated positive day counts, deduplicated.
pub fn parse_thresholds(name: &'static str, raw: &str) -> Result<Vec<i64>, ConfigError> {
    let mut thresholds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let value = parse_positive::<i64>(name, part)?;
        if !thresholds.contains(&value) {
            thresholds.push(value);
        }
    }

    if thresholds.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "at least one threshold is required".to_string(),
        });
    }

    thresholds.sort_unstable_by(|a, b| b.cmp(a));
    Ok(thresholds)
}
