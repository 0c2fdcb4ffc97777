mod commands;
mod completer;

pub use commands::CommandResult;
pub use completer::WatchCompleter;

use std::io::Write;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Editor};
use sitewatch_core::{OwnerId, SessionState, Sessions, SiteService};

use crate::display::Spinner;

const HISTORY_FILE: &str = ".sitewatch_history";

/// Local stand-in for the chat: every line goes through the same
/// conversation handling a Telegram message would.
pub struct Repl {
    editor: Editor<WatchCompleter, DefaultHistory>,
    sessions: Sessions,
    owner: OwnerId,
}

impl Repl {
    pub fn new(service: SiteService, owner: OwnerId) -> anyhow::Result<Self> {
        let config = rustyline::Config::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .edit_mode(rustyline::EditMode::Emacs)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(WatchCompleter::new()));

        let _ = editor.load_history(&history_path());

        Ok(Self {
            editor,
            sessions: Sessions::new(service),
            owner,
        })
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.print_banner();

        loop {
            let prompt = self.get_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    self.editor.add_history_entry(line)?;

                    match self.execute_line(line).await {
                        CommandResult::Continue => {}
                        CommandResult::Exit => break,
                        CommandResult::Error(e) => {
                            eprintln!("{} {}", "Error:".bright_red().bold(), e);
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("exit");
                    break;
                }
                Err(err) => {
                    eprintln!("{} {:?}", "Error:".bright_red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&history_path());

        Ok(())
    }

    fn print_banner(&self) {
        println!();
        println!(
            "  {} - website and certificate watch",
            format!("sitewatch v{}", env!("CARGO_PKG_VERSION"))
                .bright_purple()
                .bold()
        );
        println!("  Acting as owner {}", self.owner.to_string().bright_cyan());
        println!(
            "  Type {} for chat commands, {} to leave\n",
            "/help".bright_green(),
            "exit".bright_green()
        );
    }

    fn get_prompt(&self) -> String {
        let pending = match self.sessions.state(&self.owner) {
            SessionState::Idle => "",
            SessionState::AwaitingUrl => " [url]",
            SessionState::AwaitingRemovalChoice { .. } => " [remove]",
        };
        format!(
            "{}{} ",
            "sitewatch".bright_cyan().bold(),
            format!("{}›", pending).white()
        )
    }

    async fn execute_line(&mut self, line: &str) -> CommandResult {
        match line.to_lowercase().as_str() {
            "exit" | "quit" | "q" => return CommandResult::Exit,
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
                let _ = std::io::stdout().flush();
                return CommandResult::Continue;
            }
            _ => {}
        }

        // Only /status goes to the network
        let spinner = line
            .to_lowercase()
            .starts_with("/status")
            .then(|| Spinner::new("Checking websites"));

        let reply = self.sessions.handle(&self.owner, line).await;
        if let Some(spinner) = spinner {
            spinner.finish();
        }

        match reply {
            Ok(text) => {
                println!("{}\n", text);
                CommandResult::Continue
            }
            Err(e) => CommandResult::Error(e.to_string()),
        }
    }
}

fn history_path() -> std::path::PathBuf {
    dirs::home_dir()
        .map(|p| p.join(HISTORY_FILE))
        .unwrap_or_else(|| HISTORY_FILE.into())
}
