use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{NotificationRoute, Notifier};
use crate::error::{Result, WatchError};
use crate::registry::OwnerId;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends plain-text messages through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
    route: NotificationRoute,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_url", &self.api_url)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, route: NotificationRoute) -> Result<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            bot_token: bot_token.into(),
            route,
        })
    }

    /// Point at a different Bot API server (self-hosted or a test double).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn route(&self) -> &NotificationRoute {
        &self.route
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, message), fields(owner = %owner))]
    async fn notify(&self, owner: &OwnerId, message: &str) -> Result<()> {
        let (chat_id, topic_id) = self.route.destination(owner);
        let payload = SendMessage {
            chat_id: &chat_id,
            text: message,
            message_thread_id: topic_id,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            // reqwest errors carry the URL, which contains the token
            .map_err(|e| WatchError::Notification(e.without_url().to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            warn!(chat_id = %chat_id, status = %status, "Telegram rejected notification");
            return Err(WatchError::Notification(format!(
                "Telegram API returned non-success status: {status}. Body: {body}"
            )));
        }

        info!(chat_id = %chat_id, topic = ?topic_id, "Notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_payload() {
        let notifier = TelegramNotifier::new("123:abc", NotificationRoute::Owner)
            .unwrap()
            .with_api_url("http://localhost:8081/");
        assert_eq!(notifier.endpoint(), "http://localhost:8081/bot123:abc/sendMessage");

        let payload = SendMessage {
            chat_id: "-100",
            text: "hi",
            message_thread_id: None,
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["chat_id"], "-100");
        assert!(json.get("message_thread_id").is_none());
    }

    #[test]
    fn test_debug_hides_token() {
        let notifier = TelegramNotifier::new("secret-token", NotificationRoute::Owner).unwrap();
        assert!(!format!("{:?}", notifier).contains("secret-token"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_delivery_error() {
        let notifier = TelegramNotifier::new("t", NotificationRoute::User { user_id: 1 })
            .unwrap()
            .with_api_url("http://0.0.0.0:9");
        let owner = OwnerId::new("1").unwrap();
        let err = notifier.notify(&owner, "hello").await.unwrap_err();
        assert!(matches!(err, WatchError::Notification(_)));
    }
}
