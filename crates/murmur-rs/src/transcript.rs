//! Plain-text transcript layout for line-oriented hosts.

use crate::store::ConversationSummary;
use crate::{Message, Role};

/// Lay out `messages` as display lines for a surface `width` columns wide.
///
/// ```text
///
/// ---
/// #           USER
/// ---
///
/// hello
///
/// ```
///
/// SYSTEM messages are skipped.
pub fn render(messages: &[Message], width: usize) -> Vec<String> {
    let mut lines = vec![String::new()];
    for msg in messages.iter().filter(|m| m.is_display()) {
        lines.push("---".to_string());
        lines.push(role_header(msg.role, width));
        lines.push("---".to_string());
        lines.push(String::new());
        lines.extend(msg.content.split('\n').map(str::to_string));
        lines.push(String::new());
    }
    lines
}

/// `#` for USER, `##` otherwise, followed by the centered upper-case role.
fn role_header(role: Role, width: usize) -> String {
    let name = role.to_string().to_uppercase();
    let heading = if role == Role::User { "#" } else { "##" };
    let padding = width.saturating_sub(name.len() + heading.len()) / 2;
    format!("{heading}{}{name}", " ".repeat(padding))
}

/// Lines for a conversation listing, most recent first as given.
pub fn format_listing(summaries: &[ConversationSummary]) -> Vec<String> {
    let mut lines = vec!["Conversations:".to_string()];
    lines.extend(summaries.iter().map(|s| {
        format!(
            "ID: {} | Created: {} | Messages: {}",
            s.id,
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            s.message_count
        )
    }));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn renders_blocks_per_message() {
        let messages = vec![
            Message::system("hidden"),
            Message::user("hi"),
            Message::assistant("line one\nline two"),
        ];
        let lines = render(&messages, 20);
        assert_eq!(
            lines,
            vec![
                "",
                "---",
                "#       USER",
                "---",
                "",
                "hi",
                "",
                "---",
                "##    ASSISTANT",
                "---",
                "",
                "line one",
                "line two",
                "",
            ]
        );
    }

    #[test]
    fn narrow_width_does_not_underflow() {
        assert_eq!(role_header(Role::Assistant, 3), "##ASSISTANT");
    }

    #[test]
    fn empty_transcript_is_one_blank_line() {
        assert_eq!(render(&[], 80), vec![""]);
    }

    #[test]
    fn listing_format() {
        let summaries = vec![ConversationSummary {
            id: "cv-1".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap(),
            message_count: 3,
        }];
        assert_eq!(
            format_listing(&summaries),
            vec![
                "Conversations:",
                "ID: cv-1 | Created: 2024-03-01 09:05:07 | Messages: 3"
            ]
        );
    }
}
