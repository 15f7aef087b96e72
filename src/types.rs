use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(format!("run_{}", Uuid::new_v4().simple()))
    }

    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 12)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum PrismError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: PrismError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<PrismError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- CORE ROLES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// --- INBOUND EVENT MODEL ---

/// One low-level generation event for a single conversational turn.
/// Closed over the three kinds the processor dispatches on; anything else
/// the runtime sends parses to `LineEvent::Unknown` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    MessageStart {
        role: Role,
    },
    MessageUpdate {
        role: Role,
        #[serde(rename = "type")]
        kind: UpdateKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    MessageEnd {
        role: Role,
        message: AssistantMessage,
    },
}

impl AgentEvent {
    pub fn role(&self) -> Role {
        match self {
            Self::MessageStart { role } => *role,
            Self::MessageUpdate { role, .. } => *role,
            Self::MessageEnd { role, .. } => *role,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    TextDelta,
    TextStart,
    TextEnd,
    /// Subtypes this processor does not handle (tool deltas etc.)
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: Vec<MessagePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MessagePart {
    Text { content: String },
    Thought { content: String },
}

/// --- OUTBOUND SINK PAYLOADS ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisibleUpdate {
    /// Cumulative cleaned text for the message so far
    pub text: String,
    /// Newly appended suffix relative to the previous update
    pub delta: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_urls: Option<Vec<String>>,
    #[serde(default)]
    pub audio_as_voice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_tag: Option<String>,
    #[serde(default)]
    pub reply_to_current: bool,
}

/// --- CONFIGURATION ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Reasoning is never surfaced
    #[default]
    Off,
    /// Reasoning is formatted and delivered as a block reply when no
    /// reasoning sink is registered
    InlineBlock,
    /// Reasoning is delivered incrementally through the reasoning sink
    Streamed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Drain at every qualifying update, force-drain at `text_end`
    EagerTextEnd,
    /// Single forced drain at `message_end`
    #[default]
    LazyMessageEnd,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamConfig {
    pub reasoning: ReasoningMode,
    pub chunking: ChunkPolicy,
    /// When false, visible text is accumulated in a flat buffer and
    /// delivered as one block at message end (no safe-split chunker).
    pub use_block_chunker: bool,
}

impl StreamConfig {
    pub fn new(reasoning: ReasoningMode, chunking: ChunkPolicy) -> Self {
        Self {
            reasoning,
            chunking,
            use_block_chunker: true,
        }
    }
}

/// --- WIRE PARSING ---

#[derive(Debug)]
pub enum LineEvent {
    Event(AgentEvent),
    Unknown(String),
}

/// Parses one wire line into an event. Never errors: oversized or
/// unrecognized payloads degrade to `Unknown` and are logged upstream.
pub fn parse_agent_line(data: &str) -> LineEvent {
    if data.len() > crate::constants::MAX_EVENT_LINE_BYTES {
        tracing::warn!("[STREAM] Event line too large: {} bytes", data.len());
        return LineEvent::Unknown(format!("oversized line ({} bytes)", data.len()));
    }
    if let Ok(event) = serde_json::from_str::<AgentEvent>(data) {
        return LineEvent::Event(event);
    }
    let snippet = crate::str_utils::first_n_chars_lossy(data, 200);
    tracing::debug!("[STREAM] Unknown line format: {}", snippet);
    LineEvent::Unknown(data.to_string())
}

#[cfg(test)]
mod parsing_tests {
    use super::*;

    #[test]
    fn test_parse_message_start() {
        let json = r#"{"event":"message_start","role":"assistant"}"#;
        match parse_agent_line(json) {
            LineEvent::Event(AgentEvent::MessageStart { role }) => {
                assert_eq!(role, Role::Assistant)
            }
            other => panic!("Expected MessageStart, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_update_with_delta() {
        let json =
            r#"{"event":"message_update","role":"assistant","type":"text_delta","delta":"Hi"}"#;
        match parse_agent_line(json) {
            LineEvent::Event(AgentEvent::MessageUpdate { kind, delta, .. }) => {
                assert_eq!(kind, UpdateKind::TextDelta);
                assert_eq!(delta.as_deref(), Some("Hi"));
            }
            other => panic!("Expected MessageUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_update_subtype_degrades() {
        let json =
            r#"{"event":"message_update","role":"assistant","type":"toolcall_delta","delta":"x"}"#;
        match parse_agent_line(json) {
            LineEvent::Event(AgentEvent::MessageUpdate { kind, .. }) => {
                assert_eq!(kind, UpdateKind::Other)
            }
            other => panic!("Expected MessageUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage_line() {
        match parse_agent_line("event: ping") {
            LineEvent::Unknown(_) => {}
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_message_end() {
        let json = r#"{"event":"message_end","role":"assistant","message":{"role":"assistant","content":[{"type":"Text","content":"done"}]}}"#;
        match parse_agent_line(json) {
            LineEvent::Event(AgentEvent::MessageEnd { message, .. }) => {
                assert_eq!(message.content.len(), 1)
            }
            other => panic!("Expected MessageEnd, got {:?}", other),
        }
    }
}
