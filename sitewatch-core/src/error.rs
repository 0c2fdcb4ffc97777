use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("Invalid owner id: {0}")]
    InvalidOwner(String),

    #[error("Malformed registry {path}: {reason}")]
    MalformedRegistry { path: PathBuf, reason: String },

    #[error("Registry I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("WHOIS lookup failed: {0}")]
    Whois(String),

    #[error("WHOIS server not found for TLD: {0}")]
    WhoisServerNotFound(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("{0} is already monitored")]
    AlreadyMonitored(String),

    #[error("{0} is not monitored")]
    NotMonitored(String),

    #[error("Unknown section '{0}': expected ssl, dns or domain")]
    UnknownSection(String),
}

impl WatchError {
    /// Errors that describe bad user input rather than a system fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            WatchError::InvalidUrl(_)
                | WatchError::InvalidOwner(_)
                | WatchError::AlreadyMonitored(_)
                | WatchError::NotMonitored(_)
                | WatchError::UnknownSection(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
