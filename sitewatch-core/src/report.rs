//! Text rendering of status reports and target lists.
//!
//! The same formatter serves the terminal (colored) and chat replies (plain).

use chrono::NaiveDateTime;
use colored::Colorize;

use crate::probe::{DomainStatus, SslState};
use crate::registry::{DisplaySettings, Section, Target};
use crate::service::TargetStatus;
use crate::timefmt;

pub const NO_TARGETS: &str = "No sites are currently monitored.";

pub struct ReportFormatter {
    use_colors: bool,
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter {
    pub fn new() -> Self {
        Self { use_colors: true }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    fn label(&self, text: &str) -> String {
        if self.use_colors {
            text.bright_cyan().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn value(&self, text: &str) -> String {
        if self.use_colors {
            text.bright_white().to_string()
        } else {
            text.to_string()
        }
    }

    fn success(&self, text: &str) -> String {
        if self.use_colors {
            text.bright_green().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn warning(&self, text: &str) -> String {
        if self.use_colors {
            text.bright_yellow().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn error(&self, text: &str) -> String {
        if self.use_colors {
            text.bright_red().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn section(&self, text: &str) -> String {
        let line = format!("--- {} ---", text);
        if self.use_colors {
            line.bright_magenta().bold().to_string()
        } else {
            line
        }
    }

    fn field(&self, label: &str, value: String) -> String {
        format!("{}: {}", self.label(label), value)
    }

    /// Days left, highlighted once inside the warning window.
    fn days_left(&self, expires: Option<NaiveDateTime>, now: NaiveDateTime) -> String {
        match expires {
            Some(expires) => {
                let days = timefmt::days_until(&expires, &now);
                let text = days.to_string();
                if days < 7 {
                    self.error(&text)
                } else if days <= 30 {
                    self.warning(&text)
                } else {
                    self.value(&text)
                }
            }
            None => self.value("N/A"),
        }
    }

    /// One block per target: health line, then the sections enabled in the
    /// target's display settings.
    pub fn format_status(&self, status: &TargetStatus, now: NaiveDateTime) -> String {
        let target = &status.target;
        let report = &status.report;
        let settings: DisplaySettings = target.settings;
        let mut output = Vec::new();

        output.push(format!("🌐 {}", self.value(&target.url)));

        let status_line = if report.website.is_healthy() {
            format!("🟢 {}", self.success(&report.website.status))
        } else {
            format!("🔴 {}", self.error(&report.website.status))
        };
        output.push(self.field("Status", status_line));
        if let Some(ref error) = report.website.error {
            output.push(self.field("Error", self.error(error)));
        }

        if settings.is_shown(Section::Ssl) {
            output.push(self.section("SSL"));
            let valid = report.ssl.state == SslState::Valid;
            output.push(self.field(
                "Valid",
                if valid {
                    self.success("true")
                } else {
                    self.error("false")
                },
            ));
            output.push(self.field(
                "Expires",
                self.value(target.ssl_expires.as_deref().unwrap_or("N/A")),
            ));
            output.push(self.field("Days Left", self.days_left(target.ssl_expires_at(), now)));
            if let Some(ref error) = report.ssl.error {
                output.push(self.field("Error", self.error(error)));
            }
        }

        if settings.is_shown(Section::Domain) {
            output.push(self.section("Domain"));
            output.extend(self.domain_lines(target, report.domain.as_ref(), now));
        }

        if settings.is_shown(Section::Dns) {
            output.push(self.section("DNS"));
            output.extend(self.dns_lines(target));
        }

        output.join("\n")
    }

    fn domain_lines(&self, target: &Target, domain: Option<&DomainStatus>, now: NaiveDateTime) -> Vec<String> {
        let mut lines = Vec::new();
        let stored = target.domain_expires.as_deref().unwrap_or("N/A");

        match domain {
            Some(domain) if !domain.success => {
                let reason = domain.error.as_deref().unwrap_or("unknown error");
                lines.push(self.field(
                    "Expires",
                    format!(
                        "{} (Last checked: {}, Expires: {})",
                        self.error(&format!("WHOIS error: {}", reason)),
                        target.domain_last_checked.as_deref().unwrap_or("N/A"),
                        stored
                    ),
                ));
            }
            _ => lines.push(self.field("Expires", self.value(stored))),
        }
        lines.push(self.field("Days Left", self.days_left(target.domain_expires_at(), now)));

        let registrar = domain
            .filter(|d| d.success)
            .and_then(|d| match (&d.registrar, &d.registrar_url) {
                (Some(name), Some(url)) => Some(format!("{} ({})", name, url)),
                (Some(name), None) => Some(name.clone()),
                _ => None,
            });
        lines.push(self.field(
            "Registrar",
            self.value(registrar.as_deref().unwrap_or("Unknown")),
        ));
        lines
    }

    fn dns_lines(&self, target: &Target) -> Vec<String> {
        let render = |records: Option<&Vec<String>>| match records {
            Some(records) if !records.is_empty() => records.join(", "),
            _ => "none".to_string(),
        };

        let mut lines = vec![
            self.field("A", self.value(&render(target.dns_a.as_ref()))),
            self.field("MX", self.value(&render(target.dns_mx.as_ref()))),
        ];
        if let Some(ref other) = target.dns_other {
            for (kind, records) in other {
                lines.push(self.field(&kind.to_uppercase(), self.value(&render(Some(records)))));
            }
        }
        if let Some(ref checked) = target.dns_last_checked {
            lines.push(self.field("Checked", self.value(checked)));
        }
        lines
    }

    /// Every status block separated by a blank line.
    pub fn format_statuses(&self, statuses: &[TargetStatus], now: NaiveDateTime) -> String {
        if statuses.is_empty() {
            return NO_TARGETS.to_string();
        }
        statuses
            .iter()
            .map(|s| self.format_status(s, now))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn format_targets(&self, targets: &[Target]) -> String {
        if targets.is_empty() {
            return NO_TARGETS.to_string();
        }
        let mut output = vec![self.label("Monitored websites:"), String::new()];
        output.extend(targets.iter().map(|t| format!("- {}", self.value(&t.url))));
        output.join("\n")
    }

    /// Numbered list used when asking which target to remove.
    pub fn format_choices(&self, urls: &[String]) -> String {
        urls.iter()
            .enumerate()
            .map(|(i, url)| format!("{}. {}", i + 1, self.value(url)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_settings(&self, url: &str, settings: &DisplaySettings) -> String {
        let flag = |shown: bool| {
            if shown {
                self.success("shown")
            } else {
                self.warning("hidden")
            }
        };
        [
            format!("⚙️ {}", self.value(url)),
            self.field("SSL", flag(settings.show_ssl)),
            self.field("DNS", flag(settings.show_dns)),
            self.field("Domain", flag(settings.show_domain)),
        ]
        .join("\n")
    }
}
