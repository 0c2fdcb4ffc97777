use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Helper;

const COMMANDS: &[&str] = &[
    "/start",
    "/help",
    "/add",
    "/remove",
    "/list",
    "/listsites",
    "/status",
    "/settings",
    "/cancel",
    "clear",
    "exit",
    "quit",
];

const SECTIONS: &[&str] = &["ssl", "dns", "domain"];

fn pairs(candidates: &[&str], prefix: &str) -> Vec<Pair> {
    candidates
        .iter()
        .filter(|c| c.starts_with(prefix))
        .map(|c| Pair {
            display: c.to_string(),
            replacement: c.to_string(),
        })
        .collect()
}

pub struct WatchCompleter;

impl WatchCompleter {
    pub fn new() -> Self {
        Self
    }
}

impl Completer for WatchCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];
        let words: Vec<&str> = line_to_cursor.split_whitespace().collect();
        let current_word = if line_to_cursor.ends_with(' ') {
            ""
        } else {
            words.last().copied().unwrap_or("")
        };
        let start = line_to_cursor.len() - current_word.len();

        if words.is_empty() || (words.len() == 1 && !current_word.is_empty()) {
            return Ok((start, pairs(COMMANDS, current_word)));
        }

        // /settings <url> <section>
        let completing_section = words[0].eq_ignore_ascii_case("/settings")
            && ((words.len() == 2 && current_word.is_empty())
                || (words.len() == 3 && !current_word.is_empty()));
        if completing_section {
            return Ok((start, pairs(SECTIONS, &current_word.to_lowercase())));
        }

        Ok((pos, vec![]))
    }
}

impl Hinter for WatchCompleter {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if line.is_empty() || pos < line.len() || !line.ends_with(' ') {
            return None;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() != 1 {
            return None;
        }

        match words[0].to_lowercase().as_str() {
            "/add" | "/remove" => Some("[url]".to_string()),
            "/settings" => Some("<url> [ssl|dns|domain]".to_string()),
            _ => None,
        }
    }
}

impl Highlighter for WatchCompleter {}
impl Validator for WatchCompleter {}
impl Helper for WatchCompleter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_pairs() {
        let found: Vec<String> = pairs(COMMANDS, "/li").into_iter().map(|p| p.replacement).collect();
        assert_eq!(found, vec!["/list", "/listsites"]);
        assert!(pairs(SECTIONS, "x").is_empty());
    }
}
