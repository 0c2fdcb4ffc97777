use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static REGISTRAR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?im)^\s*Registrar:[ \t]*(.+)$",
        r"(?im)^\s*Registrar Name:[ \t]*(.+)$",
        r"(?im)^\s*Sponsoring Registrar:[ \t]*(.+)$",
    ])
});

static REGISTRAR_URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?im)^\s*Registrar URL:[ \t]*(.+)$",
        r"(?im)^\s*Referral URL:[ \t]*(.+)$",
    ])
});

static EXPIRATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?im)^\s*Registry Expiry Date:[ \t]*(.+)$",
        r"(?im)^\s*Registrar Registration Expiration Date:[ \t]*(.+)$",
        r"(?im)^\s*Expir(?:y|ation) Date:[ \t]*(.+)$",
        r"(?im)^\s*Expires On:[ \t]*(.+)$",
        r"(?im)^\s*Expires:[ \t]*(.+)$",
        r"(?im)^\s*paid-till:[ \t]*(.+)$",
    ])
});

static NAMESERVER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?im)^\s*Name Server:[ \t]*(.+)$",
        r"(?im)^\s*nserver:[ \t]*(.+)$",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Fields of a WHOIS answer that the expiry check cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisResponse {
    pub domain: String,
    pub registrar: Option<String>,
    pub registrar_url: Option<String>,
    /// Expiration field exactly as the server wrote it
    pub expiration_raw: Option<String>,
    /// Parsed expiration, UTC
    pub expiration_date: Option<NaiveDateTime>,
    pub nameservers: Vec<String>,
    pub whois_server: String,
    pub raw_response: String,
}

impl WhoisResponse {
    pub fn parse(domain: &str, whois_server: &str, raw: &str) -> Self {
        let expiration_raw = extract_field(raw, &EXPIRATION_PATTERNS);
        let expiration_date = expiration_raw.as_deref().and_then(parse_date);

        WhoisResponse {
            domain: domain.to_string(),
            registrar: extract_field(raw, &REGISTRAR_PATTERNS),
            registrar_url: extract_field(raw, &REGISTRAR_URL_PATTERNS),
            expiration_raw,
            expiration_date,
            nameservers: extract_nameservers(raw),
            whois_server: whois_server.to_string(),
            raw_response: raw.to_string(),
        }
    }

    /// The server answered but has no record for the domain.
    pub fn is_available(&self) -> bool {
        let available_patterns = [
            "no match",
            "not found",
            "no data found",
            "no entries found",
            "status: free",
            "status: available",
            "domain not found",
            "no object found",
        ];

        let lower = self.raw_response.to_lowercase();
        self.expiration_raw.is_none() && available_patterns.iter().any(|p| lower.contains(p))
    }
}

/// First non-empty, non-redacted capture across `patterns`, in order.
fn extract_field(text: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures_iter(text).find_map(|caps| {
            let value = caps.get(1)?.as_str().trim();
            let redacted = value.to_lowercase().contains("redacted");
            (!value.is_empty() && !redacted).then(|| value.to_string())
        })
    })
}

pub(crate) fn parse_date(date_str: &str) -> Option<NaiveDateTime> {
    let formats = [
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d",
        "%d-%b-%Y",
        "%d-%B-%Y",
        "%Y.%m.%d",
        "%Y/%m/%d",
        "%d.%m.%Y",
        "%d/%m/%Y",
        "%b %d %Y",
    ];

    let cleaned = date_str
        .trim()
        .replace(" (UTC)", "")
        .replace(" UTC", "Z")
        .replace(" +0000", "Z");

    if let Ok(dt) = cleaned.parse::<DateTime<Utc>>() {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(dt.naive_utc());
    }

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

fn extract_nameservers(text: &str) -> Vec<String> {
    let mut nameservers = Vec::new();

    for re in NAMESERVER_PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                // nserver lines may carry glue addresses after the name
                let ns = m
                    .as_str()
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .trim_end_matches('.')
                    .to_lowercase();
                if !ns.is_empty() && !nameservers.contains(&ns) {
                    nameservers.push(ns);
                }
            }
        }
    }

    nameservers
}
