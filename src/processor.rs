//! Message stream processor.
//!
//! Owns per-message state for one conversation, dispatches the three event
//! kinds to the tag scanner, directive parsers, chunker and dedup ledger,
//! and drives the emission decisions: what goes to the visible-text sink,
//! which of the two reasoning routes fires, and which blocks reach the
//! delivery sink after deduplication. No handler throws for malformed
//! input; parsing failures degrade to literal text or are withheld.

use crate::chunker::BlockChunker;
use crate::constants::{
    COMPACTION_HANDOFF_MARKER, HEARTBEAT_TOKEN, MAX_STREAM_EVENTS, SILENT_REPLY_TOKEN,
};
use crate::dedup::DedupLedger;
use crate::directives::{
    parse_directives, strip_trailing_directive, DeltaDirectiveParser, ReplyDirectives,
};
use crate::logging::StreamMetrics;
use crate::raw_stream::RawStreamTap;
use crate::reasoning::{
    extract_message_text, extract_message_thinking, extract_thinking_stream,
    extract_thinking_text, format_reasoning, promote_thinking_tags,
};
use crate::sinks::SinkSet;
use crate::str_utils::first_n_chars_lossy;
use crate::tag_state::{strip_tags, strip_tags_partial, TagState};
use crate::types::{
    AgentEvent, AssistantMessage, BlockPayload, ChunkPolicy, LineEvent, PrismError, ReasoningMode,
    Result, Role, RunId, StreamConfig, UpdateKind, VisibleUpdate,
};
use futures_util::{Stream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use tracing_error::SpanTrace;

lazy_static! {
    static ref FINAL_TAG_RE: Regex = Regex::new(r"(?i)<\s*/?\s*final\s*>").unwrap();
}

fn is_silent_reply(text: &str) -> bool {
    text.trim() == SILENT_REPLY_TOKEN
}

fn strip_heartbeat(text: &str) -> String {
    match text.trim_start().strip_prefix(HEARTBEAT_TOKEN) {
        Some(rest) => rest.trim_start().to_string(),
        None => text.to_string(),
    }
}

/// Removes a leading compaction-handoff line the runtime may prepend to
/// the first assistant message after history compaction.
fn strip_compaction_handoff(text: &str) -> String {
    let start = text.trim_start();
    if !start.starts_with(COMPACTION_HANDOFF_MARKER) {
        return text.to_string();
    }
    match start.find('\n') {
        Some(idx) => start[idx + 1..].trim_start().to_string(),
        None => String::new(),
    }
}

fn block_payload(text: String, directives: ReplyDirectives) -> BlockPayload {
    BlockPayload {
        text,
        media_urls: if directives.media_urls.is_empty() {
            None
        } else {
            Some(directives.media_urls)
        },
        audio_as_voice: directives.audio_as_voice,
        reply_to_id: directives.reply_to_id,
        reply_to_tag: directives.reply_to_tag,
        reply_to_current: directives.reply_to_current,
    }
}

/// Per-message mutable state, fully reset at every assistant
/// `message_start`. Start-of-message is the only safe reset boundary:
/// terminal events can arrive late or be duplicated by some providers and
/// must not re-trigger deliveries.
#[derive(Debug, Default)]
struct MessageState {
    /// All raw text received for the current message, append-only.
    delta_buffer: String,
    /// Undelivered visible text when no chunker is configured.
    block_buffer: String,
    last_streamed: Option<String>,
    last_streamed_cleaned: Option<String>,
    emitted_visible_update: bool,
    /// Length of `finalized_texts` at message start.
    baseline: usize,
}

pub struct StreamProcessor {
    run_id: RunId,
    config: StreamConfig,
    sinks: SinkSet,
    state: MessageState,
    chunker: Option<BlockChunker>,
    /// Tag carry-state for per-chunk visible-delta stripping.
    partial_tags: TagState,
    /// Directive carry for the streaming visible path.
    partial_directives: DeltaDirectiveParser,
    /// Directive carry for the block delivery path.
    block_directives: DeltaDirectiveParser,
    ledger: DedupLedger,
    /// Finalized assistant texts accumulated over the whole turn.
    finalized_texts: Vec<String>,
    last_block_text: Option<String>,
    last_reasoning_sent: Option<String>,
    metrics: StreamMetrics,
    tap: Option<RawStreamTap>,
}

impl StreamProcessor {
    pub fn new(run_id: RunId, config: StreamConfig, sinks: SinkSet) -> Self {
        Self {
            run_id,
            config,
            sinks,
            state: MessageState::default(),
            chunker: if config.use_block_chunker {
                Some(BlockChunker::new())
            } else {
                None
            },
            partial_tags: TagState::default(),
            partial_directives: DeltaDirectiveParser::default(),
            block_directives: DeltaDirectiveParser::default(),
            ledger: DedupLedger::new(),
            finalized_texts: Vec::new(),
            last_block_text: None,
            last_reasoning_sent: None,
            metrics: StreamMetrics::new(),
            tap: None,
        }
    }

    pub fn with_tap(mut self, tap: RawStreamTap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn tap(&self) -> Option<&RawStreamTap> {
        self.tap.as_ref()
    }

    pub fn finalized_texts(&self) -> &[String] {
        &self.finalized_texts
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Records content delivered through a side-channel path (e.g. an
    /// explicit reply tool), so end-of-message block delivery never
    /// double-posts the same text.
    pub fn record_delivered(&mut self, text: &str) {
        tracing::debug!(
            "[STREAM] Recording side-channel delivery: {}",
            first_n_chars_lossy(text, 50)
        );
        self.ledger.record_text(text);
        self.finalized_texts.push(text.to_string());
    }

    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::MessageStart { role } => self.handle_message_start(role),
            AgentEvent::MessageUpdate {
                role,
                kind,
                delta,
                content,
            } => self.handle_message_update(role, kind, delta, content),
            AgentEvent::MessageEnd { role, message } => self.handle_message_end(role, message),
        }
    }

    fn handle_message_start(&mut self, role: Role) {
        if role != Role::Assistant {
            return;
        }
        tracing::debug!(
            "[STREAM] message_start: new assistant message (finalized_texts={}, reasoning={:?}, chunking={:?})",
            self.finalized_texts.len(),
            self.config.reasoning,
            self.config.chunking
        );
        self.reset_message_state();
        // Earliest reliable "generation has begun" signal (typing indicators).
        self.sinks.signal_turn_start();
    }

    fn reset_message_state(&mut self) {
        self.state = MessageState {
            baseline: self.finalized_texts.len(),
            ..MessageState::default()
        };
        if let Some(chunker) = self.chunker.as_mut() {
            chunker.reset();
        }
        self.partial_tags = TagState::default();
        self.partial_directives.reset();
        self.block_directives.reset();
        self.metrics = StreamMetrics::new();
    }

    fn handle_message_update(
        &mut self,
        role: Role,
        kind: UpdateKind,
        delta: Option<String>,
        content: Option<String>,
    ) {
        if role != Role::Assistant || kind == UpdateKind::Other {
            return;
        }

        let delta = delta.unwrap_or_default();
        let content = content.unwrap_or_default();
        if let Some(tap) = self.tap.as_mut() {
            tap.record_text_stream(kind, &delta, &content);
        }

        let chunk = match kind {
            UpdateKind::TextDelta => delta,
            UpdateKind::TextStart | UpdateKind::TextEnd => {
                if !delta.is_empty() {
                    delta
                } else if !content.is_empty() {
                    // Resend quirk: terminal updates may carry the full
                    // accumulated content instead of a delta. Append only
                    // the unseen suffix to keep the buffer monotonic.
                    if let Some(suffix) = content.strip_prefix(self.state.delta_buffer.as_str()) {
                        suffix.to_string()
                    } else if self.state.delta_buffer.contains(&content) {
                        String::new()
                    } else {
                        content
                    }
                } else {
                    String::new()
                }
            }
            UpdateKind::Other => return,
        };

        tracing::trace!(
            "[STREAM] update: kind={:?} chunk_len={} buffer_len={}",
            kind,
            chunk.len(),
            self.state.delta_buffer.len()
        );
        self.metrics.record_update(chunk.chars().count());

        if !chunk.is_empty() {
            self.state.delta_buffer.push_str(&chunk);
            match self.chunker.as_mut() {
                Some(chunker) => chunker.append(&chunk),
                None => self.state.block_buffer.push_str(&chunk),
            }
        }

        if self.config.reasoning == ReasoningMode::Streamed && self.sinks.has_reasoning() {
            let reasoning = extract_thinking_stream(&self.state.delta_buffer);
            self.emit_reasoning_stream(&reasoning);
        }

        // Carry the tag state across chunks even while nothing is visible
        // yet, so a region opened in a skipped chunk is not misread later.
        let visible_delta = self.partial_tags.apply(&chunk);

        let next = strip_tags_partial(&self.state.delta_buffer)
            .trim()
            .to_string();
        if !next.is_empty() {
            let parsed_delta = if visible_delta.is_empty() {
                None
            } else {
                Some(self.partial_directives.consume(&visible_delta))
            };
            let parsed_full = parse_directives(strip_trailing_directive(&next));
            let cleaned = strip_compaction_handoff(&parsed_full.text);

            let media_urls = parsed_delta
                .as_ref()
                .map(|p| p.directives.media_urls.clone())
                .filter(|urls| !urls.is_empty());
            let has_media = media_urls.is_some();
            let has_audio = parsed_delta
                .as_ref()
                .map(|p| p.directives.audio_as_voice)
                .unwrap_or(false);
            let previous = self
                .state
                .last_streamed_cleaned
                .clone()
                .unwrap_or_default();

            let mut should_emit = false;
            let mut delta_text = String::new();
            if cleaned.is_empty() && !has_media && !has_audio {
                // Nothing visible yet.
            } else if !previous.is_empty() && !cleaned.starts_with(&previous) {
                // Prefix-consistency guard: a shrinking or reordered
                // partial is suppressed, never emitted out of order.
                tracing::warn!(
                    "[STREAM] Suppressing non-extension visible update (prev {} chars, next {} chars)",
                    previous.chars().count(),
                    cleaned.chars().count()
                );
                self.metrics.record_suppressed();
            } else {
                delta_text = cleaned[previous.len()..].to_string();
                should_emit = !delta_text.is_empty() || has_media || has_audio;
            }

            self.state.last_streamed = Some(next);
            self.state.last_streamed_cleaned = Some(cleaned.clone());

            if should_emit {
                self.metrics.record_visible(delta_text.chars().count());
                self.sinks.emit_visible(VisibleUpdate {
                    text: cleaned,
                    delta: delta_text,
                    media_urls,
                });
                self.state.emitted_visible_update = true;
            }
        }

        if self.sinks.has_blocks() && self.config.chunking == ChunkPolicy::EagerTextEnd {
            self.drain_blocks(false);
            if kind == UpdateKind::TextEnd {
                let chunker_buffered = self
                    .chunker
                    .as_ref()
                    .map(|c| c.has_buffered())
                    .unwrap_or(false);
                tracing::debug!(
                    "[STREAM] text_end block drain: chunker_buffered={} block_buffer_len={}",
                    chunker_buffered,
                    self.state.block_buffer.len()
                );
                if chunker_buffered {
                    self.drain_blocks(true);
                    if let Some(chunker) = self.chunker.as_mut() {
                        chunker.reset();
                    }
                } else if !self.state.block_buffer.is_empty() {
                    let buffered = std::mem::take(&mut self.state.block_buffer);
                    let stripped = strip_tags(&buffered);
                    self.emit_block_chunk(&stripped);
                }
            }
        }
    }

    fn handle_message_end(&mut self, role: Role, message: AssistantMessage) {
        if role != Role::Assistant {
            return;
        }

        let mut message = message;
        promote_thinking_tags(&mut message);
        let raw_text = extract_message_text(&message);
        let structured_thinking = extract_message_thinking(&message);

        let raw_thinking = if self.config.reasoning == ReasoningMode::Off {
            String::new()
        } else if !structured_thinking.is_empty() {
            structured_thinking
        } else {
            extract_thinking_text(&raw_text)
        };

        tracing::debug!(
            "[FINALIZE] assistant message finalized: raw_len={} thinking_len={} buffer_len={} emitted_update={}",
            raw_text.len(),
            raw_thinking.len(),
            self.state.delta_buffer.len(),
            self.state.emitted_visible_update
        );
        if let Some(tap) = self.tap.as_mut() {
            tap.record_message_end(&raw_text, &raw_thinking);
        }

        let text = strip_compaction_handoff(&strip_tags(&raw_text));
        let formatted_reasoning = format_reasoning(&raw_thinking);

        let trimmed = text.trim();
        let parsed = if trimmed.is_empty() {
            None
        } else {
            Some(parse_directives(strip_trailing_directive(trimmed)))
        };
        let mut cleaned = parsed.as_ref().map(|p| p.text.clone()).unwrap_or_default();
        let mut directives = parsed.map(|p| p.directives).unwrap_or_default();

        if cleaned.is_empty() && directives.media_urls.is_empty() {
            // Fallback for providers that wrap the whole answer in final
            // tags or send nothing the scanner kept.
            let raw_trimmed = raw_text.trim();
            let raw_stripped = FINAL_TAG_RE.replace_all(raw_trimmed, "");
            let candidate = if raw_stripped.trim().is_empty() {
                raw_trimmed.to_string()
            } else {
                raw_stripped.trim().to_string()
            };
            if !candidate.is_empty() {
                let fallback = parse_directives(strip_trailing_directive(&candidate));
                cleaned = if fallback.text.is_empty() {
                    candidate
                } else {
                    fallback.text
                };
                directives.merge(fallback.directives);
            }
        }

        let media_urls = if directives.media_urls.is_empty() {
            None
        } else {
            Some(directives.media_urls.clone())
        };
        if !self.state.emitted_visible_update && (!cleaned.is_empty() || media_urls.is_some()) {
            // Fallback path for providers that send no intermediate deltas.
            tracing::debug!(
                "[FINALIZE] emitting fallback visible update ({} chars)",
                cleaned.chars().count()
            );
            self.metrics.record_visible(cleaned.chars().count());
            self.sinks.emit_visible(VisibleUpdate {
                text: cleaned.clone(),
                delta: cleaned.clone(),
                media_urls: media_urls.clone(),
            });
            self.state.emitted_visible_update = true;
        }

        let added_during_message = self.finalized_texts.len() > self.state.baseline;
        let chunker_has_buffered = self
            .chunker
            .as_ref()
            .map(|c| c.has_buffered())
            .unwrap_or(false);
        if !trimmed.is_empty() {
            self.finalized_texts.push(trimmed.to_string());
        }

        // Reasoning routing: the stream sink wins whenever registered;
        // inline block delivery is the explicit opt-in fallback, and the
        // same content value never goes to both.
        let has_reasoning_sink = self.sinks.has_reasoning();
        let should_inline_reasoning = self.config.reasoning == ReasoningMode::InlineBlock
            && !formatted_reasoning.is_empty()
            && self.sinks.has_blocks()
            && !has_reasoning_sink
            && self.last_reasoning_sent.as_deref() != Some(formatted_reasoning.as_str());
        let reasoning_before_answer = should_inline_reasoning
            && self.config.chunking == ChunkPolicy::LazyMessageEnd
            && !added_during_message;

        tracing::debug!(
            "[FINALIZE] reasoning routing: inline={} before_answer={} stream_sink={} reasoning_len={}",
            should_inline_reasoning,
            reasoning_before_answer,
            has_reasoning_sink,
            formatted_reasoning.len()
        );

        if reasoning_before_answer {
            self.emit_inline_reasoning(&formatted_reasoning);
        }

        let should_emit_block_at_end = (self.config.chunking == ChunkPolicy::LazyMessageEnd
            || chunker_has_buffered
            || !self.state.block_buffer.is_empty())
            && !trimmed.is_empty()
            && self.sinks.has_blocks();

        tracing::debug!(
            "[FINALIZE] block emission: at_end={} chunker_buffered={} block_buffer_len={} text_len={}",
            should_emit_block_at_end,
            chunker_has_buffered,
            self.state.block_buffer.len(),
            text.len()
        );

        if should_emit_block_at_end {
            if chunker_has_buffered {
                self.drain_blocks(true);
                if let Some(chunker) = self.chunker.as_mut() {
                    chunker.reset();
                }
            } else if self.last_block_text.as_deref() != Some(text.as_str()) {
                if self.ledger.has_text(&text) {
                    tracing::debug!(
                        "[FINALIZE] Skipping message_end block reply - already sent via messaging tool: {}...",
                        first_n_chars_lossy(&text, 50)
                    );
                    self.metrics.record_deduped();
                } else {
                    self.last_block_text = Some(text.clone());
                    let parsed_block = parse_directives(strip_trailing_directive(trimmed));
                    let cleaned_block = strip_heartbeat(parsed_block.text.trim());
                    let block_directives = parsed_block.directives;
                    if is_silent_reply(&cleaned_block) {
                        tracing::debug!("[FINALIZE] Skipping silent block reply");
                    } else if !cleaned_block.is_empty()
                        || !block_directives.media_urls.is_empty()
                        || block_directives.audio_as_voice
                    {
                        self.metrics.record_block();
                        self.sinks
                            .emit_block(block_payload(cleaned_block, block_directives));
                    }
                }
            }
        }

        if !reasoning_before_answer && should_inline_reasoning {
            self.emit_inline_reasoning(&formatted_reasoning);
        }

        if has_reasoning_sink
            && !raw_thinking.is_empty()
            && self.config.reasoning != ReasoningMode::Off
        {
            self.emit_reasoning_stream(&raw_thinking);
        }

        if self.config.chunking == ChunkPolicy::EagerTextEnd && self.sinks.has_blocks() {
            // Tail flush: directives resolved after the last drained block,
            // plus a lone withheld bracket that turned out to be text.
            let tail = self.block_directives.finish();
            let cleaned_tail = strip_heartbeat(tail.text.trim());
            if (!cleaned_tail.is_empty() && !is_silent_reply(&cleaned_tail))
                || !tail.directives.is_empty()
            {
                self.metrics.record_block();
                self.sinks
                    .emit_block(block_payload(cleaned_tail, tail.directives));
            }
        }

        self.metrics.log_summary(&self.run_id);

        // Only buffers are cleared here; the full reset happens at the next
        // message_start because terminal events can be late or duplicated.
        self.state.delta_buffer.clear();
        self.state.block_buffer.clear();
        if let Some(chunker) = self.chunker.as_mut() {
            chunker.reset();
        }
        self.partial_tags = TagState::default();
        self.partial_directives.reset();
        self.block_directives.reset();
        self.state.last_streamed = None;
        self.state.last_streamed_cleaned = None;
    }

    fn drain_blocks(&mut self, force: bool) {
        if let Some(mut chunker) = self.chunker.take() {
            chunker.drain(force, |block| self.emit_block_chunk(block));
            self.chunker = Some(chunker);
        }
    }

    fn emit_block_chunk(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if is_silent_reply(text) {
            tracing::debug!("[STREAM] Skipping silent block reply");
            return;
        }
        if self.ledger.has_text(text) {
            tracing::debug!(
                "[STREAM] Skipping block - already sent via messaging tool: {}...",
                first_n_chars_lossy(text, 50)
            );
            self.metrics.record_deduped();
            return;
        }
        let parsed = self.block_directives.consume(text);
        let cleaned = strip_heartbeat(parsed.text.trim());
        if cleaned.is_empty() && parsed.directives.is_empty() {
            return;
        }
        self.last_block_text = Some(text.to_string());
        self.metrics.record_block();
        self.sinks
            .emit_block(block_payload(cleaned, parsed.directives));
    }

    fn emit_inline_reasoning(&mut self, formatted: &str) {
        self.last_reasoning_sent = Some(formatted.to_string());
        self.metrics.record_reasoning(formatted.chars().count());
        self.sinks.emit_block(BlockPayload {
            text: formatted.to_string(),
            ..BlockPayload::default()
        });
    }

    /// Emits reasoning through the stream sink, deduplicated against the
    /// last value sent: an extension sends only the new suffix, identical
    /// content sends nothing.
    fn emit_reasoning_stream(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.last_reasoning_sent.as_deref() {
            Some(last) if last == text => {}
            Some(last) if text.starts_with(last) => {
                let suffix = text[last.len()..].to_string();
                self.last_reasoning_sent = Some(text.to_string());
                self.metrics.record_reasoning(suffix.chars().count());
                self.sinks.emit_reasoning(suffix);
            }
            _ => {
                self.last_reasoning_sent = Some(text.to_string());
                self.metrics.record_reasoning(text.chars().count());
                self.sinks.emit_reasoning(text.to_string());
            }
        }
    }

    /// Consumes a typed event stream to completion. The handlers are
    /// synchronous; this loop only awaits the upstream source.
    pub async fn run_events<S>(&mut self, mut events: S) -> Result<()>
    where
        S: Stream<Item = AgentEvent> + Unpin,
    {
        let mut seen = 0usize;
        while let Some(event) = events.next().await {
            seen += 1;
            if seen > MAX_STREAM_EVENTS {
                return Err(PrismError::Internal(
                    "event stream exceeded max event limit".to_string(),
                    SpanTrace::capture(),
                )
                .into());
            }
            self.handle_event(event);
        }
        Ok(())
    }

    /// Consumes a raw line stream (e.g. off a queue or socket), parsing
    /// each line leniently. Unknown lines are logged and skipped.
    pub async fn run_lines<S>(&mut self, mut lines: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<String, std::io::Error>> + Unpin,
    {
        let mut seen = 0usize;
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("[STREAM] Line read error: {}", e);
                    return Err(PrismError::Io(e).into());
                }
            };
            seen += 1;
            if seen > MAX_STREAM_EVENTS {
                return Err(PrismError::Internal(
                    "line stream exceeded max event limit".to_string(),
                    SpanTrace::capture(),
                )
                .into());
            }
            match crate::types::parse_agent_line(&line) {
                LineEvent::Event(event) => self.handle_event(event),
                LineEvent::Unknown(_) => {}
            }
        }
        Ok(())
    }
}
