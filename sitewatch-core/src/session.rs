//! Per-owner conversation state for multi-step chat commands.
//!
//! `/add` and `/remove` without an argument start a short dialogue. Any
//! command that arrives mid-dialogue abandons it and runs as if the owner
//! were idle.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::{Result, WatchError};
use crate::registry::{OwnerId, Section};
use crate::report::{ReportFormatter, NO_TARGETS};
use crate::service::SiteService;
use crate::timefmt;

pub const START_TEXT: &str = "Website Monitoring Bot started!\n\
Use /status to check current website statuses or /listsites to list monitored sites.";

pub const HELP_TEXT: &str = "Available commands:\n\
/add [url] - start monitoring a website\n\
/remove [url] - stop monitoring a website\n\
/list - list monitored websites\n\
/status - check every monitored website now\n\
/settings <url> [ssl|dns|domain] - show or toggle report sections\n\
/cancel - abandon the current dialogue";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingUrl,
    /// Numbered choices as shown to the owner
    AwaitingRemovalChoice { options: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Start,
    Help,
    Add(Option<&'a str>),
    Remove(Option<&'a str>),
    List,
    Status,
    Settings(&'a str),
    Cancel,
    Unknown(&'a str),
}

/// `None` when `input` is not a command.
fn parse_command(input: &str) -> Option<Command<'_>> {
    let rest = input.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    // Group chats address commands as /name@botname
    let name = head.split('@').next().unwrap_or_default();
    let arg = Some(args).filter(|a| !a.is_empty());

    Some(match name.to_lowercase().as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "add" => Command::Add(arg),
        "remove" => Command::Remove(arg),
        "list" | "listsites" => Command::List,
        "status" => Command::Status,
        "settings" => Command::Settings(args),
        "cancel" => Command::Cancel,
        _ => Command::Unknown(name),
    })
}

pub struct Sessions {
    service: SiteService,
    states: Mutex<HashMap<OwnerId, SessionState>>,
    formatter: ReportFormatter,
}

impl Sessions {
    pub fn new(service: SiteService) -> Self {
        Self {
            service,
            states: Mutex::new(HashMap::new()),
            formatter: ReportFormatter::new().without_colors(),
        }
    }

    pub fn state(&self, owner: &OwnerId) -> SessionState {
        self.with_states(|states| states.get(owner).cloned().unwrap_or_default())
    }

    fn with_states<T>(&self, f: impl FnOnce(&mut HashMap<OwnerId, SessionState>) -> T) -> T {
        let mut guard = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Session lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&mut guard)
    }

    fn take_state(&self, owner: &OwnerId) -> SessionState {
        self.with_states(|states| states.remove(owner).unwrap_or_default())
    }

    fn set_state(&self, owner: &OwnerId, state: SessionState) {
        self.with_states(|states| {
            if state == SessionState::Idle {
                states.remove(owner);
            } else {
                states.insert(owner.clone(), state);
            }
        });
    }

    /// Process one message from `owner` and return the reply.
    ///
    /// User mistakes become replies; only system faults are errors. An error
    /// leaves the owner idle.
    pub async fn handle(&self, owner: &OwnerId, input: &str) -> Result<String> {
        let input = input.trim();
        let state = self.take_state(owner);

        let (next, reply) = match parse_command(input) {
            Some(Command::Cancel) => {
                let reply = if state == SessionState::Idle {
                    "Nothing to cancel."
                } else {
                    "Cancelled."
                };
                (SessionState::Idle, reply.to_string())
            }
            Some(command) => {
                if state != SessionState::Idle {
                    debug!(owner = %owner, ?state, "Command interrupted pending dialogue");
                }
                self.dispatch(owner, command).await?
            }
            None => self.continue_dialogue(owner, state, input)?,
        };

        self.set_state(owner, next);
        Ok(reply)
    }

    async fn dispatch(&self, owner: &OwnerId, command: Command<'_>) -> Result<(SessionState, String)> {
        let idle = |reply: String| Ok((SessionState::Idle, reply));

        match command {
            Command::Start => idle(START_TEXT.to_string()),
            Command::Help => idle(HELP_TEXT.to_string()),
            Command::Add(Some(url)) => idle(user_facing(self.add(owner, url))?),
            Command::Add(None) => Ok((
                SessionState::AwaitingUrl,
                "Send the URL to monitor, or /cancel.".to_string(),
            )),
            Command::Remove(Some(url)) => idle(user_facing(self.remove(owner, url))?),
            Command::Remove(None) => {
                let options: Vec<String> = self
                    .service
                    .list_targets(owner)?
                    .into_iter()
                    .map(|t| t.url)
                    .collect();
                if options.is_empty() {
                    return idle(NO_TARGETS.to_string());
                }
                let reply = format!(
                    "Which site should be removed? Reply with its number or URL, or /cancel.\n\n{}",
                    self.formatter.format_choices(&options)
                );
                Ok((SessionState::AwaitingRemovalChoice { options }, reply))
            }
            Command::List => idle(self.formatter.format_targets(&self.service.list_targets(owner)?)),
            Command::Status => {
                let statuses = self.service.get_status(owner).await?;
                idle(self.formatter.format_statuses(&statuses, timefmt::now()))
            }
            Command::Settings(args) => idle(user_facing(self.settings(owner, args))?),
            Command::Cancel => idle("Nothing to cancel.".to_string()),
            Command::Unknown(name) => idle(format!(
                "Unknown command: /{}. Send /help for the list of commands.",
                name
            )),
        }
    }

    fn continue_dialogue(&self, owner: &OwnerId, state: SessionState, text: &str) -> Result<(SessionState, String)> {
        match state {
            SessionState::Idle => Ok((
                SessionState::Idle,
                "Send /help to see the available commands.".to_string(),
            )),
            SessionState::AwaitingUrl => match self.add(owner, text) {
                Ok(reply) => Ok((SessionState::Idle, reply)),
                Err(e @ WatchError::InvalidUrl(_)) => Ok((
                    SessionState::AwaitingUrl,
                    format!("❌ {}\nSend another URL, or /cancel.", e),
                )),
                Err(e) => Ok((SessionState::Idle, user_facing(Err(e))?)),
            },
            SessionState::AwaitingRemovalChoice { options } => {
                let picked = text
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| options.get(i).cloned());
                let url = picked.as_deref().unwrap_or(text);

                match self.remove(owner, url) {
                    Ok(reply) => Ok((SessionState::Idle, reply)),
                    Err(e) if e.is_user_facing() => Ok((
                        SessionState::AwaitingRemovalChoice { options },
                        format!("❌ {}\nReply with a number from the list, or /cancel.", e),
                    )),
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn add(&self, owner: &OwnerId, raw_url: &str) -> Result<String> {
        let url = self.service.add_target(owner, raw_url)?;
        info!(owner = %owner, url = %url, "Added via chat");
        Ok(format!("✅ {} is now monitored.", url))
    }

    fn remove(&self, owner: &OwnerId, raw_url: &str) -> Result<String> {
        let url = self.service.remove_target(owner, raw_url)?;
        Ok(format!("🗑️ {} is no longer monitored.", url))
    }

    fn settings(&self, owner: &OwnerId, args: &str) -> Result<String> {
        let mut parts = args.split_whitespace();
        let (url, section) = match (parts.next(), parts.next()) {
            (Some(url), section) => (url, section),
            (None, _) => return Ok("Usage: /settings <url> [ssl|dns|domain]".to_string()),
        };

        match section {
            Some(raw) => {
                let section: Section = raw.parse()?;
                let settings = self.service.toggle_setting(owner, url, section)?;
                Ok(self.formatter.format_settings(url, &settings))
            }
            None => {
                let wanted = crate::validation::validate_url(url).unwrap_or_else(|_| url.to_string());
                let target = self
                    .service
                    .list_targets(owner)?
                    .into_iter()
                    .find(|t| t.url == wanted)
                    .ok_or(WatchError::NotMonitored(wanted))?;
                Ok(self.formatter.format_settings(&target.url, &target.settings))
            }
        }
    }
}

/// Turn a user mistake into a reply; system faults stay errors.
fn user_facing(result: Result<String>) -> Result<String> {
    match result {
        Err(e) if e.is_user_facing() => Ok(format!("❌ {}", e)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::probe::{DnsStatus, DomainStatus, Prober, SslStatus, WebsiteStatus};
    use crate::registry::Registry;

    struct UpProber;

    #[async_trait]
    impl Prober for UpProber {
        async fn check_website(&self, url: &str) -> WebsiteStatus {
            WebsiteStatus::up(url, "200 OK")
        }
        async fn check_ssl(&self, url: &str) -> SslStatus {
            SslStatus::valid(url, timefmt::now() + chrono::Duration::days(90))
        }
        async fn check_domain(&self, host: &str) -> DomainStatus {
            DomainStatus::failed(host, "No expiration date found")
        }
        async fn check_dns(&self, host: &str) -> DnsStatus {
            DnsStatus::failed(host, "offline")
        }
    }

    fn sessions(dir: &tempfile::TempDir) -> Sessions {
        let registry = Arc::new(Registry::new(dir.path()));
        Sessions::new(SiteService::new(registry, Arc::new(UpProber)))
    }

    fn owner() -> OwnerId {
        OwnerId::new("-100123").unwrap()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/add"), Some(Command::Add(None)));
        assert_eq!(parse_command("/add  https://a.com "), Some(Command::Add(Some("https://a.com"))));
        assert_eq!(parse_command("/listsites@watch_bot"), Some(Command::List));
        assert_eq!(parse_command("/Status"), Some(Command::Status));
        assert_eq!(parse_command("/frobnicate x"), Some(Command::Unknown("frobnicate")));
    }

    #[tokio::test]
    async fn test_add_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);

        let reply = s.handle(&owner(), "/add").await.unwrap();
        assert!(reply.starts_with("Send the URL"));
        assert_eq!(s.state(&owner()), SessionState::AwaitingUrl);

        let reply = s.handle(&owner(), "http://localhost").await.unwrap();
        assert!(reply.starts_with("❌"));
        assert_eq!(s.state(&owner()), SessionState::AwaitingUrl);

        let reply = s.handle(&owner(), "https://Example.com/").await.unwrap();
        assert_eq!(reply, "✅ https://example.com is now monitored.");
        assert_eq!(s.state(&owner()), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_add_duplicate_ends_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);
        s.handle(&owner(), "/add https://a.com").await.unwrap();

        s.handle(&owner(), "/add").await.unwrap();
        let reply = s.handle(&owner(), "https://a.com").await.unwrap();
        assert_eq!(reply, "❌ https://a.com is already monitored");
        assert_eq!(s.state(&owner()), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_remove_dialogue_by_number() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);

        assert_eq!(s.handle(&owner(), "/remove").await.unwrap(), NO_TARGETS);
        assert_eq!(s.state(&owner()), SessionState::Idle);

        s.handle(&owner(), "/add https://a.com").await.unwrap();
        s.handle(&owner(), "/add https://b.com").await.unwrap();

        let reply = s.handle(&owner(), "/remove").await.unwrap();
        assert!(reply.ends_with("1. https://a.com\n2. https://b.com"));

        let reply = s.handle(&owner(), "7").await.unwrap();
        assert!(reply.starts_with("❌ 7 is not monitored"));
        assert!(matches!(s.state(&owner()), SessionState::AwaitingRemovalChoice { .. }));

        let reply = s.handle(&owner(), "2").await.unwrap();
        assert_eq!(reply, "🗑️ https://b.com is no longer monitored.");
        assert_eq!(s.state(&owner()), SessionState::Idle);
        assert_eq!(
            s.handle(&owner(), "/list").await.unwrap(),
            "Monitored websites:\n\n- https://a.com"
        );
    }

    #[tokio::test]
    async fn test_command_interrupts_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);

        s.handle(&owner(), "/add").await.unwrap();
        let reply = s.handle(&owner(), "/list").await.unwrap();
        assert_eq!(reply, NO_TARGETS);
        assert_eq!(s.state(&owner()), SessionState::Idle);

        // Plain text is no longer treated as a URL
        let reply = s.handle(&owner(), "https://a.com").await.unwrap();
        assert!(reply.contains("/help"));
        assert!(s.service.list_targets(&owner()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);

        assert_eq!(s.handle(&owner(), "/cancel").await.unwrap(), "Nothing to cancel.");
        s.handle(&owner(), "/add").await.unwrap();
        assert_eq!(s.handle(&owner(), "/cancel").await.unwrap(), "Cancelled.");
        assert_eq!(s.state(&owner()), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_sessions_are_per_owner() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);
        let other = OwnerId::new("42").unwrap();

        s.handle(&owner(), "/add").await.unwrap();
        assert_eq!(s.state(&other), SessionState::Idle);
        assert!(s.handle(&other, "https://a.com").await.unwrap().contains("/help"));
        assert_eq!(s.state(&owner()), SessionState::AwaitingUrl);
    }

    #[tokio::test]
    async fn test_settings_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let s = sessions(&dir);
        s.handle(&owner(), "/add https://a.com").await.unwrap();

        assert!(s.handle(&owner(), "/settings").await.unwrap().starts_with("Usage"));
        assert_eq!(
            s.handle(&owner(), "/settings https://a.com dns").await.unwrap(),
            "⚙️ https://a.com\nSSL: shown\nDNS: hidden\nDomain: shown"
        );
        assert!(s
            .handle(&owner(), "/settings https://a.com color")
            .await
            .unwrap()
            .starts_with("❌ Unknown section"));
        assert!(s
            .handle(&owner(), "/settings https://b.com")
            .await
            .unwrap()
            .starts_with("❌ https://b.com is not monitored"));

        let status = s.handle(&owner(), "/status").await.unwrap();
        assert!(status.starts_with("🌐 https://a.com\nStatus: 🟢 200 OK"));
        assert!(!status.contains("--- DNS ---"));
    }
}
