//! System prompt assembly: the operator's base prompt plus an optional block
//! describing who is talking and when.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{info, warn};

pub const DEFAULT_BASE_PROMPT: &str =
    "You are Daia, a friendly assistant chatting in a Discord server. \
Keep answers concise and use Discord markdown where it helps.";

/// Live details about the conversation, gathered per message.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub participants: &'a BTreeSet<String>,
    pub current_user: &'a str,
    pub current_time: &'a str,
    pub history_limit: u32,
}

/// Base prompt, then a blank line, then the contextual block. With
/// `enabled == false` the base prompt comes back untouched.
pub fn compose_system_prompt(enabled: bool, base: &str, ctx: &PromptContext<'_>) -> String {
    if !enabled {
        return base.to_string();
    }

    let mut names: BTreeSet<&str> = ctx
        .participants
        .iter()
        .map(String::as_str)
        .filter(|n| !n.trim().is_empty())
        .collect();
    if !ctx.current_user.trim().is_empty() {
        names.insert(ctx.current_user);
    }
    let participants = if names.is_empty() {
        "Unknown".to_string()
    } else {
        names.into_iter().collect::<Vec<_>>().join(", ")
    };

    format!(
        "{base}\n\n{}",
        contextual_block(ctx.history_limit, ctx.current_user, &participants, ctx.current_time)
    )
}

fn contextual_block(history_limit: u32, user: &str, participants: &str, time: &str) -> String {
    format!(
        "Priority Contextual System Guidance:\n\
\n\
You can see up to {history_limit} earlier messages from this conversation along with details about the people in it. \
Use them to keep replies personal and consistent. Never claim you do not know something you were given here, such as the user's name.\n\
\n\
Answer the way a person following the whole conversation would, and refer back to earlier messages when it helps.\n\
\n\
Key information:\n\
- You are talking to a human named {user}. Address them by that name when it fits, unless they ask otherwise.\n\
- More than one person may be in the conversation. Current participants: {participants}.\n\
- Current time: {time}.\n"
    )
}

/// Read the base prompt from `path`, falling back to [`DEFAULT_BASE_PROMPT`]
/// when unset, unreadable, or empty.
pub fn load_base_prompt(path: Option<&str>) -> String {
    let Some(path) = path else {
        return DEFAULT_BASE_PROMPT.to_string();
    };
    match std::fs::read_to_string(Path::new(path)) {
        Ok(text) if !text.trim().is_empty() => {
            info!(path, chars = text.len(), "loaded system prompt");
            text.trim_end().to_string()
        }
        Ok(_) => {
            warn!(path, "system prompt file is empty, using built-in prompt");
            DEFAULT_BASE_PROMPT.to_string()
        }
        Err(e) => {
            warn!(path, error = %e, "cannot read system prompt file, using built-in prompt");
            DEFAULT_BASE_PROMPT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn disabled_returns_base_verbatim() {
        let participants = set(&["mo"]);
        let ctx = PromptContext {
            participants: &participants,
            current_user: "kai",
            current_time: "2025-01-01 00:00:00 +00:00",
            history_limit: 12,
        };
        assert_eq!(compose_system_prompt(false, "BASE", &ctx), "BASE");
    }

    #[test]
    fn enabled_output_is_golden() {
        let participants = set(&["mo", "ana"]);
        let ctx = PromptContext {
            participants: &participants,
            current_user: "kai",
            current_time: "2025-01-01 09:30:00 +09:00",
            history_limit: 8,
        };
        let expected = "BASE\n\nPriority Contextual System Guidance:\n\
\n\
You can see up to 8 earlier messages from this conversation along with details about the people in it. \
Use them to keep replies personal and consistent. Never claim you do not know something you were given here, such as the user's name.\n\
\n\
Answer the way a person following the whole conversation would, and refer back to earlier messages when it helps.\n\
\n\
Key information:\n\
- You are talking to a human named kai. Address them by that name when it fits, unless they ask otherwise.\n\
- More than one person may be in the conversation. Current participants: ana, kai, mo.\n\
- Current time: 2025-01-01 09:30:00 +09:00.\n";
        assert_eq!(compose_system_prompt(true, "BASE", &ctx), expected);
    }

    #[test]
    fn current_user_listed_once() {
        let participants = set(&["kai"]);
        let ctx = PromptContext {
            participants: &participants,
            current_user: "kai",
            current_time: "t",
            history_limit: 1,
        };
        let out = compose_system_prompt(true, "B", &ctx);
        assert!(out.contains("Current participants: kai."));
        assert!(out.starts_with("B\n\nPriority"));
    }

    #[test]
    fn no_names_reads_unknown() {
        let participants = BTreeSet::new();
        let ctx = PromptContext {
            participants: &participants,
            current_user: " ",
            current_time: "t",
            history_limit: 1,
        };
        assert!(compose_system_prompt(true, "B", &ctx).contains("Current participants: Unknown."));
    }

    #[test]
    fn base_prompt_file_is_read_and_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Be a pirate.\n").unwrap();
        assert_eq!(load_base_prompt(file.path().to_str()), "Be a pirate.");
        assert_eq!(load_base_prompt(Some("/nonexistent/prompt.txt")), DEFAULT_BASE_PROMPT);
        assert_eq!(load_base_prompt(None), DEFAULT_BASE_PROMPT);
    }
}
