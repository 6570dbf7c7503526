use super::types::{Message, MessageRole, MessageStatus};
use crate::llm::ChatMessage;

/// Agent history from stored messages.
///
/// Blank and non-successful messages are dropped; the rest are stably sorted by
/// `created_at`. Only assistant messages keep the assistant role.
pub fn build_history(messages: &[Message]) -> Vec<ChatMessage> {
    let mut kept: Vec<&Message> = messages
        .iter()
        .filter(|m| !m.content.trim().is_empty() && m.status == MessageStatus::Success)
        .collect();
    kept.sort_by_key(|m| m.created_at);

    kept.into_iter()
        .map(|m| match m.role {
            MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
            _ => ChatMessage::user(m.content.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatRole;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_filters_and_orders_messages() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let messages = vec![
            Message::new(MessageRole::Assistant, "second", MessageStatus::Success, t0 + Duration::seconds(2)),
            Message::new(MessageRole::User, "   ", MessageStatus::Success, t0 + Duration::seconds(1)),
            Message::new(MessageRole::User, "first", MessageStatus::Success, t0),
            Message::new(MessageRole::Assistant, "failed", MessageStatus::Error, t0 + Duration::seconds(3)),
            Message::new(MessageRole::System, "third", MessageStatus::Success, t0 + Duration::seconds(4)),
        ];

        let history = build_history(&messages);
        assert_eq!(history.len(), 3);
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(history[2].role, ChatRole::User);
    }

    #[test]
    fn test_equal_timestamps_keep_input_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let messages = vec![
            Message::new(MessageRole::User, "a", MessageStatus::Success, t0),
            Message::new(MessageRole::Assistant, "b", MessageStatus::Success, t0),
            Message::new(MessageRole::User, "c", MessageStatus::Pending, t0),
        ];
        let contents: Vec<String> = build_history(&messages).into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }
}
