//! Message helpers shared by the ingest and router stages.

use crate::types::{Message, Role};

pub fn last_user_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().rev().find(|m| m.role == Role::User)
}

/// Text of the most recent user-authored message, trimmed.
///
/// Returns an empty string when the history holds no user message, or when
/// the latest one is blank.
pub fn last_user_text(messages: &[Message]) -> &str {
    last_user_message(messages)
        .map(|m| m.text.trim())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_most_recent_user_message() {
        let messages = vec![
            Message::user("first question"),
            Message::assistant("an answer"),
            Message::user("follow up"),
            Message::assistant("another answer"),
        ];
        assert_eq!(last_user_text(&messages), "follow up");
    }

    #[test]
    fn test_last_user_message_keeps_whitespace() {
        let messages = vec![Message::user("  padded\n"), Message::assistant("ok")];
        assert_eq!(last_user_message(&messages).map(|m| m.text.as_str()), Some("  padded\n"));
        assert_eq!(last_user_text(&messages), "padded");
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(last_user_text(&[]), "");
    }

    #[test]
    fn test_no_user_messages() {
        let messages = vec![Message::system("be brief"), Message::assistant("hello")];
        assert_eq!(last_user_text(&messages), "");
    }

    #[test]
    fn test_blank_user_message_is_empty() {
        let messages = vec![Message::user("real"), Message::user("   \n")];
        assert_eq!(last_user_text(&messages), "");
    }
}
