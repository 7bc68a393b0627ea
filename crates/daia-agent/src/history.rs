//! Turning fetched channel history into a model conversation.
//!
//! Raw Discord history is multi-party and irregular: the same person posts
//! several messages in a row, two users talk past the bot, the bot sends a
//! reply in several chunks. Model APIs want strict user/assistant
//! alternation starting with a user turn. [`normalize_history`] bridges the
//! two; [`truncate_at_marker`] applies the `/newchat` cut first.

use std::collections::{BTreeSet, HashMap};

use daia_core::types::RawHistoryEntry;
use tracing::debug;

use crate::provider::{Message, Role};
use crate::table::substitute_placeholders;

/// Posted by `/newchat`; nothing at or before it is sent to the model.
pub const NEW_CHAT_MARKER: &str = "[new chat] ---";

/// Content of the synthetic assistant turn placed between two different users.
pub const SEPARATOR_TURN: &str = "...";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Prefix each merged user turn with `"{display name}: "`.
    pub speaker_labels: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedHistory {
    pub turns: Vec<Message>,
    /// Display names of every non-bot author in the window.
    pub participants: BTreeSet<String>,
}

/// Cut newest-first history at the newest `/newchat` marker and return the
/// survivors oldest-first. The marker itself is dropped.
pub fn truncate_at_marker(mut newest_first: Vec<RawHistoryEntry>) -> Vec<RawHistoryEntry> {
    if let Some(i) = newest_first
        .iter()
        .position(|e| e.content.contains(NEW_CHAT_MARKER))
    {
        debug!(kept = i, dropped = newest_first.len() - i, "history cut at new-chat marker");
        newest_first.truncate(i);
    }
    newest_first.reverse();
    newest_first
}

struct Tagged<'a> {
    role: Role,
    author: Option<(u64, &'a str)>,
    text: &'a str,
}

/// Merge oldest-first history into alternating turns.
///
/// Consecutive bot messages merge. Consecutive messages from one user merge.
/// A user followed directly by a different user gets a [`SEPARATOR_TURN`]
/// assistant turn in between. A user who speaks again after a bot turn is
/// simply a new user turn. Table placeholders are resolved against
/// `table_map`, then leading assistant turns are dropped.
pub fn normalize_history(
    entries: &[RawHistoryEntry],
    bot_user_id: u64,
    table_map: &HashMap<String, String>,
    options: NormalizeOptions,
) -> NormalizedHistory {
    let mut participants = BTreeSet::new();
    let tagged: Vec<Tagged<'_>> = entries
        .iter()
        .map(|e| match &e.author {
            Some(a) if a.id != bot_user_id => {
                participants.insert(a.display_name.clone());
                Tagged {
                    role: Role::User,
                    author: Some((a.id, a.display_name.as_str())),
                    text: e.content.trim(),
                }
            }
            _ => Tagged {
                role: Role::Assistant,
                author: None,
                text: e.content.trim(),
            },
        })
        .collect();

    let mut turns = Vec::new();
    let mut i = 0;
    while i < tagged.len() {
        let current = &tagged[i];
        let mut parts = Vec::new();
        let mut j = i;

        if current.role == Role::Assistant {
            while j < tagged.len() && tagged[j].role == Role::Assistant {
                parts.push(tagged[j].text.to_string());
                j += 1;
            }
            turns.push(Message::assistant(parts.join("\n")));
        } else {
            let author_id = current.author.map(|(id, _)| id);
            while j < tagged.len()
                && tagged[j].role == Role::User
                && tagged[j].author.map(|(id, _)| id) == author_id
            {
                parts.push(tagged[j].text.to_string());
                j += 1;
            }
            let mut text = parts.join("\n");
            if options.speaker_labels {
                if let Some((_, name)) = current.author {
                    text = format!("{name}: {text}");
                }
            }
            turns.push(Message::user(text));

            if j < tagged.len() && tagged[j].role == Role::User {
                turns.push(Message::assistant(SEPARATOR_TURN));
            }
        }
        i = j;
    }

    if !table_map.is_empty() {
        for turn in &mut turns {
            turn.content = substitute_placeholders(&turn.content, table_map);
        }
    }

    let leading = turns
        .iter()
        .take_while(|t| t.role == Role::Assistant)
        .count();
    turns.drain(..leading);

    NormalizedHistory {
        turns,
        participants,
    }
}
