/// Inline directive delimiters embedded in generated text
pub const DIRECTIVE_OPEN: &str = "[[";
pub const DIRECTIVE_CLOSE: &str = "]]";

/// Region tag names recognized by the tag-state scanner (case-insensitive)
pub const THINKING_TAGS: &[&str] = &["thinking", "think"];
pub const FINAL_TAG: &str = "final";

/// Token the model emits when it deliberately stays silent
pub const SILENT_REPLY_TOKEN: &str = "NO_REPLY";

/// Token heartbeat turns emit; stripped from delivered text
pub const HEARTBEAT_TOKEN: &str = "HEARTBEAT_OK";

/// Marker the runtime prepends to the first assistant message after
/// history compaction
pub const COMPACTION_HANDOFF_MARKER: &str = "[[compaction_handoff]]";

/// Runaway guard for the event-stream driver
pub const MAX_STREAM_EVENTS: usize = 100_000;

/// Wire lines larger than this are never parsed as events
pub const MAX_EVENT_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Retained entries in the raw-stream tap
pub const RAW_TAP_CAPACITY: usize = 4096;
