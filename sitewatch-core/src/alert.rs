//! Alert decisions and message text.
//!
//! Everything here is pure: callers pass the current time and the stored
//! notification history, and decide themselves when to record a delivery.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::probe::{DnsStatus, SslStatus, WebsiteStatus};
use crate::registry::Target;
use crate::timefmt;

/// Which expiry a threshold warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryKind {
    Ssl,
    Domain,
}

impl fmt::Display for ExpiryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryKind::Ssl => write!(f, "SSL"),
            ExpiryKind::Domain => write!(f, "Domain"),
        }
    }
}

/// A threshold warning that is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryAlert {
    pub kind: ExpiryKind,
    /// Threshold the warning is filed under
    pub bucket: i64,
    pub days_left: i64,
    pub message: String,
}

/// Walk `thresholds` from largest to smallest and return the first one that
/// `days_left` does not exceed.
///
/// Any `days_left` at or below the largest threshold therefore maps to the
/// largest threshold.
pub fn nearest_threshold(days_left: i64, thresholds: &[i64]) -> Option<i64> {
    let mut sorted = thresholds.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let bucket = sorted.into_iter().find(|&t| days_left <= t);
    debug!(days_left, ?bucket, "Selected threshold");
    bucket
}

/// The warning for `expires`, unless its bucket was already notified.
pub fn expiry_alert(
    kind: ExpiryKind,
    url: &str,
    expires: Option<NaiveDateTime>,
    notified: &BTreeSet<i64>,
    thresholds: &[i64],
    now: NaiveDateTime,
) -> Option<ExpiryAlert> {
    let expires = expires?;
    let days_left = timefmt::days_until(&expires, &now);
    let bucket = nearest_threshold(days_left, thresholds)?;

    if notified.contains(&bucket) {
        debug!(url = %url, kind = %kind, bucket, "Bucket already notified");
        return None;
    }

    Some(ExpiryAlert {
        kind,
        bucket,
        days_left,
        message: expiry_message(kind, url, expires, days_left),
    })
}

pub fn expiry_message(kind: ExpiryKind, url: &str, expires: NaiveDateTime, days_left: i64) -> String {
    format!(
        "⚠️ {} expiration warning!\nURL: {}\nExpires: {}\nDays left: {}",
        kind,
        url,
        timefmt::format(&expires),
        days_left
    )
}

/// Incident messages for an unhealthy pair, website first. Empty when both
/// probes are healthy.
///
/// Whether the pair changed since the last cycle is the caller's question.
pub fn incident_messages(url: &str, website: &WebsiteStatus, ssl: &SslStatus) -> Vec<String> {
    let mut messages = Vec::new();

    if !website.is_healthy() {
        messages.push(format!(
            "⚠️ Website issue detected!\nURL: {}\nStatus: {}\nError: {}",
            url,
            website.status,
            website.error.as_deref().unwrap_or("N/A")
        ));
    }

    if !ssl.is_healthy() {
        messages.push(format!(
            "⚠️ SSL issue detected!\nURL: {}\nSSL Status: {}\nExpires: {}\nError: {}",
            url,
            ssl.state,
            ssl.expires
                .map(|e| timefmt::format(&e))
                .unwrap_or_else(|| "N/A".to_string()),
            ssl.error.as_deref().unwrap_or("N/A")
        ));
    }

    messages
}

/// Whether a successful snapshot differs from the one stored on `target`.
///
/// A target that never had a snapshot has nothing to compare against.
pub fn dns_changed(target: &Target, fresh: &DnsStatus) -> bool {
    let has_previous =
        target.dns_a.is_some() || target.dns_mx.is_some() || target.dns_other.is_some();
    if !fresh.success || !has_previous {
        return false;
    }

    let empty = BTreeMap::new();
    let previous_other = target.dns_other.as_ref().unwrap_or(&empty);

    target.dns_a.as_deref().unwrap_or_default() != fresh.a_records.as_slice()
        || target.dns_mx.as_deref().unwrap_or_default() != fresh.mx_records.as_slice()
        || previous_other != &fresh.other_records
}

/// One line per record type whose answers changed.
pub fn dns_change_message(url: &str, target: &Target, fresh: &DnsStatus) -> String {
    let mut lines = vec!["⚠️ DNS records changed!".to_string(), format!("URL: {}", url)];

    let mut push_diff = |name: &str, old: &[String], new: &[String]| {
        if old != new {
            lines.push(format!("{}: {} -> {}", name, render_records(old), render_records(new)));
        }
    };

    push_diff(
        "A",
        target.dns_a.as_deref().unwrap_or_default(),
        &fresh.a_records,
    );
    push_diff(
        "MX",
        target.dns_mx.as_deref().unwrap_or_default(),
        &fresh.mx_records,
    );

    let empty = BTreeMap::new();
    let previous_other = target.dns_other.as_ref().unwrap_or(&empty);
    let keys: BTreeSet<&String> = previous_other
        .keys()
        .chain(fresh.other_records.keys())
        .collect();
    for key in keys {
        let old = previous_other.get(key).map(Vec::as_slice).unwrap_or_default();
        let new = fresh.other_records.get(key).map(Vec::as_slice).unwrap_or_default();
        push_diff(&key.to_uppercase(), old, new);
    }

    lines.join("\n")
}

fn render_records(records: &[String]) -> String {
    if records.is_empty() {
        "none".to_string()
    } else {
        records.join(", ")
    }
}
