//! Per-owner persisted target lists.
//!
//! Each owner has one JSON file, `sites_<owner>.json`, holding an array of
//! target objects. Writes replace the whole file atomically (temp file in the
//! same directory, then rename), so a concurrent reader sees either the old or
//! the new list, never a partial one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WatchError};
use crate::timefmt;
use crate::validation::contains_control_chars;

const FILE_PREFIX: &str = "sites_";
const FILE_SUFFIX: &str = ".json";

static OWNER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// Namespace under which one target list is kept (a chat or user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if OWNER_ID.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(WatchError::InvalidOwner(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerId {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for OwnerId {
    type Error = WatchError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

fn default_true() -> bool {
    true
}

/// Which sections the status report shows for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default = "default_true")]
    pub show_ssl: bool,
    #[serde(default = "default_true")]
    pub show_dns: bool,
    #[serde(default = "default_true")]
    pub show_domain: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_ssl: true,
            show_dns: true,
            show_domain: true,
        }
    }
}

/// A toggleable report section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Ssl,
    Dns,
    Domain,
}

impl DisplaySettings {
    pub fn is_shown(&self, section: Section) -> bool {
        match section {
            Section::Ssl => self.show_ssl,
            Section::Dns => self.show_dns,
            Section::Domain => self.show_domain,
        }
    }

    /// Flip one section and return its new visibility.
    pub fn toggle(&mut self, section: Section) -> bool {
        let flag = match section {
            Section::Ssl => &mut self.show_ssl,
            Section::Dns => &mut self.show_dns,
            Section::Domain => &mut self.show_domain,
        };
        *flag = !*flag;
        *flag
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Ssl => write!(f, "ssl"),
            Section::Dns => write!(f, "dns"),
            Section::Domain => write!(f, "domain"),
        }
    }
}

impl FromStr for Section {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ssl" | "tls" => Ok(Section::Ssl),
            "dns" => Ok(Section::Dns),
            "domain" | "whois" => Ok(Section::Domain),
            other => Err(WatchError::UnknownSection(other.to_string())),
        }
    }
}

/// One monitored site and everything learned about it so far.
///
/// Field names are the on-disk names. Fields added after the first release
/// carry `#[serde(default)]` so older files load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    #[serde(default)]
    pub ssl_valid: Option<bool>,
    #[serde(default)]
    pub ssl_expires: Option<String>,
    #[serde(default)]
    pub domain_expires: Option<String>,
    #[serde(default)]
    pub domain_last_checked: Option<String>,
    #[serde(default)]
    pub dns_a: Option<Vec<String>>,
    #[serde(default)]
    pub dns_mx: Option<Vec<String>>,
    #[serde(default)]
    pub dns_other: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub dns_last_checked: Option<String>,
    #[serde(default)]
    pub ssl_notifications: BTreeSet<i64>,
    #[serde(default)]
    pub domain_notifications: BTreeSet<i64>,
    #[serde(default)]
    pub settings: DisplaySettings,
}

impl Target {
    /// A freshly added target; `url` must already be normalized.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ssl_valid: None,
            ssl_expires: None,
            domain_expires: None,
            domain_last_checked: None,
            dns_a: None,
            dns_mx: None,
            dns_other: None,
            dns_last_checked: None,
            ssl_notifications: BTreeSet::new(),
            domain_notifications: BTreeSet::new(),
            settings: DisplaySettings::default(),
        }
    }

    pub fn ssl_expires_at(&self) -> Option<NaiveDateTime> {
        self.ssl_expires.as_deref().and_then(timefmt::parse)
    }

    pub fn domain_expires_at(&self) -> Option<NaiveDateTime> {
        self.domain_expires.as_deref().and_then(timefmt::parse)
    }

    pub fn domain_last_checked_at(&self) -> Option<NaiveDateTime> {
        self.domain_last_checked.as_deref().and_then(timefmt::parse)
    }

    pub fn dns_last_checked_at(&self) -> Option<NaiveDateTime> {
        self.dns_last_checked.as_deref().and_then(timefmt::parse)
    }

    /// Copy what a check run learned into `self`, keeping user-owned fields
    /// (display settings) as they are.
    pub fn absorb_checks(&mut self, checked: &Target) {
        self.absorb_results(checked);
        self.ssl_notifications = checked.ssl_notifications.clone();
        self.domain_notifications = checked.domain_notifications.clone();
    }

    /// Copy check results only. Notification history is left alone, for
    /// callers that never send alerts.
    pub fn absorb_results(&mut self, checked: &Target) {
        self.ssl_valid = checked.ssl_valid;
        self.ssl_expires = checked.ssl_expires.clone();
        self.domain_expires = checked.domain_expires.clone();
        self.domain_last_checked = checked.domain_last_checked.clone();
        self.dns_a = checked.dns_a.clone();
        self.dns_mx = checked.dns_mx.clone();
        self.dns_other = checked.dns_other.clone();
        self.dns_last_checked = checked.dns_last_checked.clone();
    }
}

/// File-backed store of every owner's targets.
#[derive(Debug)]
pub struct Registry {
    data_dir: PathBuf,
    /// Serializes read-modify-write cycles per owner within this process
    locks: Mutex<HashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl Registry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, owner: &OwnerId) -> PathBuf {
        self.data_dir
            .join(format!("{}{}{}", FILE_PREFIX, owner, FILE_SUFFIX))
    }

    /// Targets of `owner`; an owner without a file has none.
    pub fn load(&self, owner: &OwnerId) -> Result<Vec<Target>> {
        let path = self.path_for(owner);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(owner = %owner, "No registry file yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                error!(owner = %owner, path = %path.display(), error = %e, "Failed to read registry");
                return Err(e.into());
            }
        };

        let targets = parse_registry(&path, &contents).inspect_err(|e| {
            error!(owner = %owner, error = %e, "Rejected registry file");
        })?;
        debug!(owner = %owner, count = targets.len(), "Loaded registry");
        Ok(targets)
    }

    /// Replace `owner`'s whole target list.
    pub fn save(&self, owner: &OwnerId, targets: &[Target]) -> Result<()> {
        let path = self.path_for(owner);

        if let Some(bad) = targets.iter().find(|t| contains_control_chars(&t.url)) {
            return Err(WatchError::MalformedRegistry {
                path,
                reason: format!("URL contains control characters: {:?}", bad.url),
            });
        }

        fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_vec_pretty(targets)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.data_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| WatchError::Io(e.error))?;

        info!(owner = %owner, count = targets.len(), "Saved registry");
        Ok(())
    }

    /// Load, modify and save `owner`'s list as one step.
    ///
    /// The closure's return value is passed through; nothing is written when
    /// it returns an error.
    pub fn update<T, F>(&self, owner: &OwnerId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Target>) -> Result<T>,
    {
        let lock = self.owner_lock(owner);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(owner = %owner, "Registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let mut targets = self.load(owner)?;
        let value = f(&mut targets)?;
        self.save(owner, &targets)?;
        Ok(value)
    }

    /// Every owner that has a registry file.
    pub fn owners(&self) -> Result<Vec<OwnerId>> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut owners = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };
            match OwnerId::new(id) {
                Ok(owner) => owners.push(owner),
                Err(_) => warn!(file = %name, "Ignoring registry file with invalid owner id"),
            }
        }

        owners.sort();
        Ok(owners)
    }

    /// Remove `owner`'s registry. Returns whether a file existed.
    pub fn delete(&self, owner: &OwnerId) -> Result<bool> {
        match fs::remove_file(self.path_for(owner)) {
            Ok(()) => {
                info!(owner = %owner, "Deleted registry");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn owner_lock(&self, owner: &OwnerId) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(owner.clone()).or_default().clone()
    }
}

fn parse_registry(path: &Path, contents: &str) -> Result<Vec<Target>> {
    let malformed = |reason: String| WatchError::MalformedRegistry {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value =
        serde_json::from_str(contents).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

    let Value::Array(items) = &value else {
        return Err(malformed("expected a list of sites".to_string()));
    };

    for (i, item) in items.iter().enumerate() {
        let url = item
            .as_object()
            .and_then(|obj| obj.get("url"))
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(format!("entry {} has no url", i)))?;
        if contains_control_chars(url) {
            return Err(malformed(format!("entry {} url contains control characters", i)));
        }
    }

    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}
