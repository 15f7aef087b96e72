//! Reasoning extraction and message normalization.
//!
//! The structured message representation (`Thought` parts) is the primary
//! reasoning source; the tag scan over raw text is the fallback for
//! providers that only emit `<thinking>` markup inline.

use crate::tag_state::{strip_tags, TagState};
use crate::types::{AssistantMessage, MessagePart};

/// Partial-mode extraction: whatever portion of an in-progress thinking
/// region is visible so far. A partial tag at the buffer tail is withheld,
/// so the result only ever extends as the buffer extends. Returns an empty
/// string, never errors, when no reasoning is present.
pub fn extract_thinking_stream(text: &str) -> String {
    let mut state = TagState::default();
    state.apply_split(text).1
}

/// Final-mode tag scan over a complete buffer. An unclosed thinking region
/// degrades to "rest of the text is reasoning".
pub fn extract_thinking_text(text: &str) -> String {
    let mut state = TagState::default();
    let (_, mut thinking) = state.apply_split(text);
    let (_, tail) = state.flush_split();
    thinking.push_str(&tail);
    thinking
}

pub fn extract_message_text(message: &AssistantMessage) -> String {
    message
        .content
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Primary structured extraction: joined `Thought` parts.
pub fn extract_message_thinking(message: &AssistantMessage) -> String {
    message
        .content
        .iter()
        .filter_map(|part| match part {
            MessagePart::Thought { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Normalizes a finalized message: thinking regions embedded in `Text`
/// parts are promoted into structured `Thought` parts, so downstream
/// extraction can prefer the structured representation.
pub fn promote_thinking_tags(message: &mut AssistantMessage) {
    let mut promoted = Vec::with_capacity(message.content.len());
    for part in message.content.drain(..) {
        match part {
            MessagePart::Text { content } => {
                let thinking = extract_thinking_text(&content);
                if thinking.trim().is_empty() {
                    promoted.push(MessagePart::Text { content });
                } else {
                    let visible = strip_tags(&content);
                    promoted.push(MessagePart::Thought {
                        content: thinking.trim().to_string(),
                    });
                    if !visible.trim().is_empty() {
                        promoted.push(MessagePart::Text { content: visible });
                    }
                }
            }
            other => promoted.push(other),
        }
    }
    message.content = promoted;
}

/// Formats reasoning for inline block delivery: a labeled blockquote so
/// chat surfaces render it visually apart from the answer.
pub fn format_reasoning(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let quoted = trimmed
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Reasoning:\n{}", quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn text_message(text: &str) -> AssistantMessage {
        AssistantMessage {
            role: Role::Assistant,
            content: vec![MessagePart::Text {
                content: text.to_string(),
            }],
        }
    }

    #[test]
    fn test_stream_extraction_mid_region() {
        assert_eq!(extract_thinking_stream("<thinking>step one"), "step one");
        assert_eq!(extract_thinking_stream("<thinking>step one</thi"), "step one");
        assert_eq!(extract_thinking_stream("no tags here"), "");
    }

    #[test]
    fn test_stream_extraction_grows_monotonically() {
        let full = "<thinking>alpha beta</thinking>answer";
        let mut previous = String::new();
        for end in 1..=full.len() {
            let current = extract_thinking_stream(&full[..end]);
            assert!(
                current.starts_with(&previous),
                "shrank at {}: {:?} -> {:?}",
                end,
                previous,
                current
            );
            previous = current;
        }
        assert_eq!(previous, "alpha beta");
    }

    #[test]
    fn test_final_extraction_unclosed_region() {
        assert_eq!(extract_thinking_text("<thinking>never closed"), "never closed");
    }

    #[test]
    fn test_message_thinking_prefers_structured_parts() {
        let message = AssistantMessage {
            role: Role::Assistant,
            content: vec![
                MessagePart::Thought {
                    content: "internal".to_string(),
                },
                MessagePart::Text {
                    content: "visible".to_string(),
                },
            ],
        };
        assert_eq!(extract_message_thinking(&message), "internal");
        assert_eq!(extract_message_text(&message), "visible");
    }

    #[test]
    fn test_promote_thinking_tags() {
        let mut message = text_message("<thinking>plan</thinking>Hello");
        promote_thinking_tags(&mut message);
        assert_eq!(
            message.content,
            vec![
                MessagePart::Thought {
                    content: "plan".to_string()
                },
                MessagePart::Text {
                    content: "Hello".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_promote_leaves_plain_text_alone() {
        let mut message = text_message("just an answer");
        promote_thinking_tags(&mut message);
        assert_eq!(
            message.content,
            vec![MessagePart::Text {
                content: "just an answer".to_string()
            }]
        );
    }

    #[test]
    fn test_format_reasoning() {
        assert_eq!(
            format_reasoning("first\nsecond"),
            "Reasoning:\n> first\n> second"
        );
        assert_eq!(format_reasoning("   "), "");
    }
}
