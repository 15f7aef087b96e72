//! Incremental region-tag scanner.
//!
//! Tracks whether the cursor is inside a thinking region, a final-answer
//! region, or an inline code span, and splits incoming text into a visible
//! stream and a thinking stream with the tag markers removed. The scanner is
//! associative over chunk boundaries: feeding a buffer chunk-by-chunk yields
//! the same output as feeding it whole, because an ambiguous tail (a partial
//! tag marker or a trailing backtick run) is withheld in the carried state
//! until more input resolves it.

use crate::constants::{FINAL_TAG, THINKING_TAGS};

const MAX_MARKER_LEN: usize = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSpanState {
    /// Backtick-run length that opened the current span; 0 means closed.
    pub open_len: usize,
}

impl CodeSpanState {
    pub fn in_code(&self) -> bool {
        self.open_len > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Thinking,
    Final,
}

enum MarkerScan {
    Complete {
        closing: bool,
        kind: TagKind,
        len: usize,
    },
    /// Input ended while the text could still become a marker
    Partial,
    NotMarker,
}

fn tag_kind(name: &str) -> Option<TagKind> {
    if THINKING_TAGS.contains(&name) {
        Some(TagKind::Thinking)
    } else if name == FINAL_TAG {
        Some(TagKind::Final)
    } else {
        None
    }
}

fn is_known_prefix(name: &str) -> bool {
    THINKING_TAGS.iter().any(|t| t.starts_with(name)) || FINAL_TAG.starts_with(name)
}

/// Scans a candidate marker at the start of `s` (which begins with `<`).
/// Markers are case-insensitive and tolerate whitespace: `< / final >`.
fn scan_marker(s: &str) -> MarkerScan {
    let mut closing = false;
    let mut name = String::new();
    let mut in_name = false;
    let mut name_done = false;

    for (idx, ch) in s.char_indices().skip(1) {
        if idx > MAX_MARKER_LEN {
            return MarkerScan::NotMarker;
        }
        match ch {
            '>' => {
                if name.is_empty() {
                    return MarkerScan::NotMarker;
                }
                return match tag_kind(&name) {
                    Some(kind) => MarkerScan::Complete {
                        closing,
                        kind,
                        len: idx + 1,
                    },
                    None => MarkerScan::NotMarker,
                };
            }
            '/' if !closing && name.is_empty() && !name_done => closing = true,
            c if c.is_whitespace() => {
                if in_name {
                    in_name = false;
                    name_done = true;
                }
            }
            c if c.is_ascii_alphabetic() => {
                if name_done {
                    return MarkerScan::NotMarker;
                }
                in_name = true;
                name.push(c.to_ascii_lowercase());
                if !is_known_prefix(&name) {
                    return MarkerScan::NotMarker;
                }
            }
            _ => return MarkerScan::NotMarker,
        }
    }
    MarkerScan::Partial
}

#[derive(Debug, Clone, Default)]
pub struct TagState {
    pub thinking: bool,
    pub final_answer: bool,
    pub inline_code: CodeSpanState,
    /// Withheld tail: a trailing backtick run or a partial tag marker.
    pending: String,
}

impl TagState {
    /// True when no region or code span is open and nothing is withheld,
    /// i.e. the position is a safe split point for block chunking.
    pub fn is_clean(&self) -> bool {
        !self.thinking
            && !self.final_answer
            && !self.inline_code.in_code()
            && self.pending.is_empty()
    }

    pub fn apply(&mut self, chunk: &str) -> String {
        self.apply_split(chunk).0
    }

    /// Processes one chunk, returning `(visible, thinking)` text with the
    /// recognized markers stripped. Markers inside an inline code span are
    /// literal text. Unbalanced markers never error: text stays in whatever
    /// region was last open.
    pub fn apply_split(&mut self, chunk: &str) -> (String, String) {
        let input = if self.pending.is_empty() {
            chunk.to_string()
        } else {
            let mut held = std::mem::take(&mut self.pending);
            held.push_str(chunk);
            held
        };

        let mut visible = String::new();
        let mut thinking = String::new();
        let mut i = 0;

        while i < input.len() {
            let rest = &input[i..];
            let ch = match rest.chars().next() {
                Some(c) => c,
                None => break,
            };

            if ch == '`' {
                let run_len = rest.chars().take_while(|&c| c == '`').count();
                if i + run_len == input.len() {
                    // Run may continue in the next chunk; withhold it.
                    self.pending = input[i..].to_string();
                    break;
                }
                self.toggle_code(run_len);
                self.route(&input[i..i + run_len], &mut visible, &mut thinking);
                i += run_len;
                continue;
            }

            if ch == '<' && !self.inline_code.in_code() {
                match scan_marker(rest) {
                    MarkerScan::Complete { closing, kind, len } => {
                        match kind {
                            TagKind::Thinking => self.thinking = !closing,
                            TagKind::Final => self.final_answer = !closing,
                        }
                        i += len;
                        continue;
                    }
                    MarkerScan::Partial => {
                        self.pending = rest.to_string();
                        break;
                    }
                    MarkerScan::NotMarker => {
                        self.route("<", &mut visible, &mut thinking);
                        i += 1;
                        continue;
                    }
                }
            }

            let ch_len = ch.len_utf8();
            self.route(&input[i..i + ch_len], &mut visible, &mut thinking);
            i += ch_len;
        }

        (visible, thinking)
    }

    pub fn flush(&mut self) -> String {
        self.flush_split().0
    }

    /// Resolves the withheld tail with end-of-stream semantics: a trailing
    /// backtick run is a completed run, a partial marker is literal text of
    /// whatever region is open.
    pub fn flush_split(&mut self) -> (String, String) {
        let pending = std::mem::take(&mut self.pending);
        let mut visible = String::new();
        let mut thinking = String::new();
        if pending.is_empty() {
            return (visible, thinking);
        }
        if pending.starts_with('`') {
            self.toggle_code(pending.len());
        }
        self.route(&pending, &mut visible, &mut thinking);
        (visible, thinking)
    }

    fn route(&self, text: &str, visible: &mut String, thinking: &mut String) {
        if self.thinking {
            thinking.push_str(text);
        } else {
            visible.push_str(text);
        }
    }

    fn toggle_code(&mut self, run_len: usize) {
        if self.inline_code.open_len == 0 {
            self.inline_code.open_len = run_len;
        } else if self.inline_code.open_len == run_len {
            self.inline_code.open_len = 0;
        }
        // A non-matching run inside an open span is literal.
    }
}

/// Strips region tags from a complete buffer. Trailing unresolved markers
/// degrade to literal text (end-of-stream semantics).
pub fn strip_tags(text: &str) -> String {
    let mut state = TagState::default();
    let mut out = state.apply(text);
    out.push_str(&state.flush());
    out
}

/// Strips region tags from a growing buffer. An ambiguous tail is withheld,
/// so the result only ever extends as the buffer extends.
pub fn strip_tags_partial(text: &str) -> String {
    let mut state = TagState::default();
    state.apply(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_chunked(text: &str, at: &[usize]) -> String {
        let mut state = TagState::default();
        let mut out = String::new();
        let mut prev = 0;
        for &idx in at {
            out.push_str(&state.apply(&text[prev..idx]));
            prev = idx;
        }
        out.push_str(&state.apply(&text[prev..]));
        out.push_str(&state.flush());
        out
    }

    #[test]
    fn test_strip_basic_thinking() {
        assert_eq!(
            strip_tags("<thinking>plan</thinking>Hello"),
            "Hello".to_string()
        );
    }

    #[test]
    fn test_strip_final_tags_keep_content() {
        assert_eq!(strip_tags("<final>The answer</final>"), "The answer");
    }

    #[test]
    fn test_think_alias_and_whitespace() {
        assert_eq!(strip_tags("<think>x</think>ok"), "ok");
        assert_eq!(strip_tags("< final >ok< / final >"), "ok");
    }

    #[test]
    fn test_chunked_matches_whole_buffer() {
        let text = "a<thinking>hidden</thinking>b<final>c</final>`<thinking>`d";
        let whole = strip_tags(text);
        for at in [
            vec![1],
            vec![3],
            vec![5, 9],
            vec![2, 14, 20],
            vec![1, 2, 3, 4, 5, 6, 7],
            vec![text.len() - 1],
        ] {
            assert_eq!(strip_chunked(text, &at), whole, "split at {:?}", at);
        }
    }

    #[test]
    fn test_marker_inside_code_span_is_literal() {
        assert_eq!(
            strip_tags("use `<thinking>` to hide text"),
            "use `<thinking>` to hide text"
        );
    }

    #[test]
    fn test_fenced_block_suppresses_markers() {
        let text = "```\n<final>x</final>\n```done";
        assert_eq!(strip_tags(text), text);
    }

    #[test]
    fn test_unbalanced_open_hides_rest() {
        assert_eq!(strip_tags("a<thinking>never closed"), "a");
    }

    #[test]
    fn test_unknown_tag_is_literal() {
        assert_eq!(strip_tags("a <div>b</div>"), "a <div>b</div>");
    }

    #[test]
    fn test_partial_marker_withheld_until_resolved() {
        let mut state = TagState::default();
        assert_eq!(state.apply("Hello <thin"), "Hello ");
        assert_eq!(state.apply("king>secret</thinking> world"), " world");
    }

    #[test]
    fn test_partial_marker_at_stream_end_is_literal() {
        assert_eq!(strip_tags("Hello <thin"), "Hello <thin");
    }

    #[test]
    fn test_strip_partial_withholds_tail() {
        assert_eq!(strip_tags_partial("Hello <thin"), "Hello ");
        assert_eq!(strip_tags_partial("code `here"), "code `here");
    }

    #[test]
    fn test_split_buckets() {
        let mut state = TagState::default();
        let (visible, thinking) = state.apply_split("a<thinking>b</thinking>c");
        assert_eq!(visible, "ac");
        assert_eq!(thinking, "b");
    }

    #[test]
    fn test_close_marker_split_mid_thinking() {
        let mut state = TagState::default();
        let (v1, t1) = state.apply_split("<thinking>almost</thi");
        let (v2, t2) = state.apply_split("nking>done");
        assert_eq!(format!("{}{}", v1, v2), "done");
        assert_eq!(format!("{}{}", t1, t2), "almost");
    }

    #[test]
    fn test_is_clean_tracks_open_regions() {
        let mut state = TagState::default();
        state.apply("plain text");
        assert!(state.is_clean());
        state.apply("<thinking>open");
        assert!(!state.is_clean());
        state.apply("</thinking>`code");
        assert!(!state.is_clean());
        state.apply("` closed");
        assert!(state.is_clean());
    }
}
