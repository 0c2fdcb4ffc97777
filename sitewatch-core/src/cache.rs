//! Last observed (website, SSL) pair per owner and target.
//!
//! Lives only in memory and starts empty on every process start. Used to
//! notify about an outage once, not on every cycle it persists.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::probe::{SslStatus, WebsiteStatus};
use crate::registry::OwnerId;

/// The pair compared between cycles.
pub type StatusPair = (WebsiteStatus, SslStatus);

/// `"<owner>:<url>"`
pub fn cache_key(owner: &OwnerId, url: &str) -> String {
    format!("{}:{}", owner, url)
}

/// Thread-safe map from `(owner, url)` to the last status pair.
#[derive(Debug, Default)]
pub struct LastStatusCache {
    entries: RwLock<HashMap<String, StatusPair>>,
}

impl LastStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: &OwnerId, url: &str) -> Option<StatusPair> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Status cache read lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.get(&cache_key(owner, url)).cloned()
    }

    /// Whether `pair` differs from what was last recorded (or nothing was).
    pub fn has_changed(&self, owner: &OwnerId, url: &str, pair: &StatusPair) -> bool {
        self.get(owner, url).as_ref() != Some(pair)
    }

    pub fn insert(&self, owner: &OwnerId, url: &str, pair: StatusPair) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Status cache write lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        debug!(owner = %owner, url = %url, "Recording last status");
        entries.insert(cache_key(owner, url), pair);
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
