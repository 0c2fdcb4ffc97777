use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};

use super::types::WebsiteStatus;
use crate::error::Result;
use crate::retry::{RetryExecutor, RetryPolicy, TransportRetryClassifier};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("sitewatch/", env!("CARGO_PKG_VERSION"));

/// HTTP reachability probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    retry: RetryExecutor<TransportRetryClassifier>,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        Self::with_settings(DEFAULT_TIMEOUT, RetryPolicy::http_probe())
    }

    pub fn with_settings(timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            retry: RetryExecutor::new(policy),
        })
    }

    /// GET `url` and report the status line.
    ///
    /// Non-2xx answers are successful probes; only transport failures are
    /// retried, and exhausting them yields a `down` status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn check(&self, url: &str) -> WebsiteStatus {
        let result = self
            .retry
            .execute(|| async {
                let response = self.client.get(url).send().await?;
                Ok(response.status())
            })
            .await;

        match result {
            Ok(status) => {
                let line = status_line(status);
                info!(status = %line, "Website check completed");
                WebsiteStatus::up(url, line)
            }
            Err(e) => {
                warn!(error = %e, "Website check failed");
                WebsiteStatus::down(url, e.to_string())
            }
        }
    }
}

/// `"<code> <reason>"`, falling back to the bare code for unknown codes.
pub fn status_line(status: StatusCode) -> String {
    let line = match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    };
    debug!(status = %line, "Rendered status line");
    line
}
