//! Outbound notifications.

mod telegram;

pub use telegram::{TelegramNotifier, DEFAULT_API_URL};

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::OwnerId;

/// Delivers alert text on behalf of an owner.
///
/// Failures are reported to the caller, which logs them and carries on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner: &OwnerId, message: &str) -> Result<()>;
}

/// Where notifications end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationRoute {
    /// Every owner's alerts go to one group chat, optionally into a forum topic
    Group {
        chat_id: String,
        topic_id: Option<i64>,
    },
    /// Every owner's alerts go to one user
    User { user_id: i64 },
    /// Each owner's alerts go back to the owner's own chat
    Owner,
}

impl NotificationRoute {
    /// Chat and thread a message for `owner` is posted to.
    pub fn destination(&self, owner: &OwnerId) -> (String, Option<i64>) {
        match self {
            NotificationRoute::Group { chat_id, topic_id } => (chat_id.clone(), *topic_id),
            NotificationRoute::User { user_id } => (user_id.to_string(), None),
            NotificationRoute::Owner => (owner.to_string(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_per_route() {
        let owner = OwnerId::new("-100500").unwrap();

        let group = NotificationRoute::Group {
            chat_id: "-100123".to_string(),
            topic_id: Some(7),
        };
        assert_eq!(group.destination(&owner), ("-100123".to_string(), Some(7)));

        let user = NotificationRoute::User { user_id: 42 };
        assert_eq!(user.destination(&owner), ("42".to_string(), None));

        assert_eq!(
            NotificationRoute::Owner.destination(&owner),
            ("-100500".to_string(), None)
        );
    }
}
