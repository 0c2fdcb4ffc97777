//! Timestamp format shared by probe results and the persisted registry.

use chrono::{NaiveDateTime, Utc};

/// Format of every timestamp stored in a registry file (always UTC).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SECONDS_PER_DAY: i64 = 86_400;

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn format(ts: &NaiveDateTime) -> String {
    ts.format(DATE_FORMAT).to_string()
}

pub fn parse(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Whole days from `now` until `expiry`, rounded towards negative infinity.
///
/// An expiry twelve hours away is `0` days; one twelve hours ago is `-1`.
pub fn days_until(expiry: &NaiveDateTime, now: &NaiveDateTime) -> i64 {
    (*expiry - *now).num_seconds().div_euclid(SECONDS_PER_DAY)
}
