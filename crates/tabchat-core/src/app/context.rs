//! Request construction: bounded conversation context and provisional titles.

use crate::api::HistoryMessage;
use crate::app::message::{ChatMessage, Role};
use crate::config::ContextConfig;

pub const TRUNCATION_MARKER: &str = "\n...[truncated]";
const TITLE_ELLIPSIS: &str = "...";

/// Builds the history sent with a request: the last `max_messages` prior
/// messages, the most recent `verbatim_recent` of them untouched and older
/// ones cut at `truncate_threshold` characters, followed by the new user
/// message.
pub fn build_history(
    prior: &[ChatMessage],
    outgoing: &str,
    config: &ContextConfig,
) -> Vec<HistoryMessage> {
    let window = &prior[prior.len().saturating_sub(config.max_messages)..];
    let verbatim_from = window.len().saturating_sub(config.verbatim_recent);

    let mut history: Vec<HistoryMessage> = window
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let content = message.outgoing_content();
            let content = if index < verbatim_from {
                truncate_chars(content, config.truncate_threshold)
            } else {
                content
            };
            HistoryMessage {
                role: message.role,
                content,
            }
        })
        .collect();

    history.push(HistoryMessage {
        role: Role::User,
        content: outgoing.to_string(),
    });
    history
}

fn truncate_chars(content: String, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &content[..cut]),
        None => content,
    }
}

/// Title shown for a session before the backend generates a better one.
pub fn provisional_title(text: &str, max_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Some(format!("{}{TITLE_ELLIPSIS}", &text[..cut])),
        None => Some(text.to_string()),
    }
}
