//! Inline reply-directive extraction.
//!
//! Directives are `[[...]]`-delimited control sequences embedded in
//! generated text: media attachments, reply targeting, and the
//! voice-playback flag. Two parsers share one scan core: a stateless
//! full-text parser used at message end, and a per-delta parser that
//! carries an unterminated `[[` tail across calls so half-received
//! directives never leak into visible output.

use crate::constants::{DIRECTIVE_CLOSE, DIRECTIVE_OPEN};
use crate::str_utils::first_n_chars_lossy;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MEDIA_RE: Regex = Regex::new(r"(?i)^media\s*:\s*(\S+)$").unwrap();
    static ref REPLY_TO_TAG_RE: Regex = Regex::new(r"(?i)^reply_to_tag\s*:\s*(\S+)$").unwrap();
    static ref REPLY_TO_RE: Regex = Regex::new(r"(?i)^reply_to\s*:\s*(\S+)$").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyDirectives {
    pub media_urls: Vec<String>,
    pub reply_to_id: Option<String>,
    pub reply_to_tag: Option<String>,
    pub reply_to_current: bool,
    pub audio_as_voice: bool,
}

impl ReplyDirectives {
    pub fn is_empty(&self) -> bool {
        self.media_urls.is_empty()
            && self.reply_to_id.is_none()
            && self.reply_to_tag.is_none()
            && !self.reply_to_current
            && !self.audio_as_voice
    }

    pub fn merge(&mut self, other: ReplyDirectives) {
        self.media_urls.extend(other.media_urls);
        if self.reply_to_id.is_none() {
            self.reply_to_id = other.reply_to_id;
        }
        if self.reply_to_tag.is_none() {
            self.reply_to_tag = other.reply_to_tag;
        }
        self.reply_to_current |= other.reply_to_current;
        self.audio_as_voice |= other.audio_as_voice;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    pub text: String,
    pub directives: ReplyDirectives,
}

fn apply_body(body: &str, out: &mut ReplyDirectives) -> bool {
    let trimmed = body.trim();
    if trimmed.eq_ignore_ascii_case("reply_to_current") {
        out.reply_to_current = true;
        return true;
    }
    if trimmed.eq_ignore_ascii_case("audio_as_voice") {
        out.audio_as_voice = true;
        return true;
    }
    if let Some(caps) = MEDIA_RE.captures(trimmed) {
        out.media_urls.push(caps[1].to_string());
        return true;
    }
    if let Some(caps) = REPLY_TO_TAG_RE.captures(trimmed) {
        if out.reply_to_tag.is_none() {
            out.reply_to_tag = Some(caps[1].to_string());
        }
        return true;
    }
    if let Some(caps) = REPLY_TO_RE.captures(trimmed) {
        if out.reply_to_id.is_none() {
            out.reply_to_id = Some(caps[1].to_string());
        }
        return true;
    }
    false
}

/// Scan core: extracts complete directives from `input` and returns
/// `(text, directives, carry)`. `carry` is an unterminated trailing
/// `[[...` tail, or a lone `[` that may still become an opener. Unknown
/// directive bodies stay in the text verbatim.
fn scan(input: &str) -> (String, ReplyDirectives, String) {
    let mut text = String::new();
    let mut directives = ReplyDirectives::default();
    let mut rest = input;

    loop {
        match rest.find(DIRECTIVE_OPEN) {
            Some(open) => {
                text.push_str(&rest[..open]);
                let after = &rest[open + DIRECTIVE_OPEN.len()..];
                match after.find(DIRECTIVE_CLOSE) {
                    Some(close) => {
                        let body = &after[..close];
                        if !apply_body(body, &mut directives) {
                            let raw_len = DIRECTIVE_OPEN.len() + close + DIRECTIVE_CLOSE.len();
                            text.push_str(&rest[open..open + raw_len]);
                        }
                        rest = &after[close + DIRECTIVE_CLOSE.len()..];
                    }
                    None => return (text, directives, rest[open..].to_string()),
                }
            }
            None => {
                if let Some(stripped) = rest.strip_suffix('[') {
                    text.push_str(stripped);
                    return (text, directives, "[".to_string());
                }
                text.push_str(rest);
                return (text, directives, String::new());
            }
        }
    }
}

/// Stateless full-text parser (message-end mode). An unterminated open
/// sequence is discarded from the visible text; a lone trailing `[` is
/// ordinary text.
pub fn parse_directives(text: &str) -> ParsedReply {
    let (mut out, directives, carry) = scan(text);
    if carry == "[" {
        out.push('[');
    } else if !carry.is_empty() {
        tracing::debug!(
            "[DIRECTIVE] Discarding unterminated directive tail: {}",
            first_n_chars_lossy(&carry, 80)
        );
    }
    ParsedReply {
        text: out,
        directives,
    }
}

/// Cuts an unterminated trailing directive off `text`. A `[[` with a later
/// `]]` is left alone; one without is removed together with everything
/// after it.
pub fn strip_trailing_directive(text: &str) -> &str {
    match text.rfind(DIRECTIVE_OPEN) {
        Some(open) => match text[open + DIRECTIVE_OPEN.len()..].find(DIRECTIVE_CLOSE) {
            Some(_) => text,
            None => &text[..open],
        },
        None => text,
    }
}

/// Per-delta parser: carries the directive-open state across calls so a
/// directive split over chunk boundaries is withheld, then resolved when
/// its closing bracket arrives.
#[derive(Debug, Default)]
pub struct DeltaDirectiveParser {
    carry: String,
}

impl DeltaDirectiveParser {
    pub fn consume(&mut self, delta: &str) -> ParsedReply {
        let input = if self.carry.is_empty() {
            delta.to_string()
        } else {
            let mut held = std::mem::take(&mut self.carry);
            held.push_str(delta);
            held
        };
        let (text, directives, carry) = scan(&input);
        self.carry = carry;
        ParsedReply { text, directives }
    }

    /// End-of-message flush: an unterminated open sequence is discarded, a
    /// lone withheld bracket comes back as plain text.
    pub fn finish(&mut self) -> ParsedReply {
        let carry = std::mem::take(&mut self.carry);
        if carry.is_empty() {
            return ParsedReply::default();
        }
        if carry == "[" {
            return ParsedReply {
                text: carry,
                directives: ReplyDirectives::default(),
            };
        }
        tracing::debug!(
            "[DIRECTIVE] Abandoning unterminated directive at message end: {}",
            first_n_chars_lossy(&carry, 80)
        );
        ParsedReply::default()
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_directive() {
        let parsed = parse_directives("Look [[media:https://x.test/cat.png]] here");
        assert_eq!(parsed.text, "Look  here");
        assert_eq!(parsed.directives.media_urls, vec!["https://x.test/cat.png"]);
    }

    #[test]
    fn test_parse_multiple_media_preserves_order() {
        let parsed = parse_directives("[[media:a.png]][[media:b.png]]");
        assert_eq!(parsed.directives.media_urls, vec!["a.png", "b.png"]);
        assert_eq!(parsed.text, "");
    }

    #[test]
    fn test_parse_reply_targeting() {
        let parsed = parse_directives("sure [[reply_to:12345]]");
        assert_eq!(parsed.directives.reply_to_id.as_deref(), Some("12345"));
        assert_eq!(parsed.text, "sure ");

        let parsed = parse_directives("[[reply_to_tag:build-fail]] on it");
        assert_eq!(
            parsed.directives.reply_to_tag.as_deref(),
            Some("build-fail")
        );
        assert!(parsed.directives.reply_to_id.is_none());
    }

    #[test]
    fn test_parse_flags() {
        let parsed = parse_directives("[[reply_to_current]][[audio_as_voice]]hi");
        assert!(parsed.directives.reply_to_current);
        assert!(parsed.directives.audio_as_voice);
        assert_eq!(parsed.text, "hi");
    }

    #[test]
    fn test_unknown_directive_stays_literal() {
        let parsed = parse_directives("a [[shrug]] b");
        assert_eq!(parsed.text, "a [[shrug]] b");
        assert!(parsed.directives.is_empty());
    }

    #[test]
    fn test_visible_text_never_contains_matched_syntax() {
        let parsed = parse_directives("x[[media:u]]y[[reply_to:1]]z");
        assert!(!parsed.text.contains("[["));
        assert!(!parsed.text.contains("]]"));
    }

    #[test]
    fn test_full_parse_discards_unterminated_tail() {
        let parsed = parse_directives("Done. [[reply_to:12");
        assert_eq!(parsed.text, "Done. ");
        assert!(parsed.directives.is_empty());
    }

    #[test]
    fn test_strip_trailing_directive() {
        assert_eq!(strip_trailing_directive("Done. [[reply"), "Done. ");
        assert_eq!(strip_trailing_directive("a [[x]] b"), "a [[x]] b");
        assert_eq!(strip_trailing_directive("no brackets"), "no brackets");
    }

    #[test]
    fn test_delta_parser_withholds_open_sequence() {
        let mut parser = DeltaDirectiveParser::default();
        let first = parser.consume("Here [[med");
        assert_eq!(first.text, "Here ");
        assert!(first.directives.is_empty());

        let second = parser.consume("ia:pic.png]] done");
        assert_eq!(second.text, " done");
        assert_eq!(second.directives.media_urls, vec!["pic.png"]);
    }

    #[test]
    fn test_delta_parser_withholds_lone_bracket() {
        let mut parser = DeltaDirectiveParser::default();
        let first = parser.consume("array[");
        assert_eq!(first.text, "array");
        let second = parser.consume("0] done");
        assert_eq!(second.text, "[0] done");
    }

    #[test]
    fn test_finish_discards_unterminated() {
        let mut parser = DeltaDirectiveParser::default();
        parser.consume("tail [[reply_to:99");
        let tail = parser.finish();
        assert_eq!(tail.text, "");
        assert!(tail.directives.is_empty());
    }

    #[test]
    fn test_finish_returns_lone_bracket() {
        let mut parser = DeltaDirectiveParser::default();
        parser.consume("open[");
        let tail = parser.finish();
        assert_eq!(tail.text, "[");
    }

    #[test]
    fn test_directives_merge() {
        let mut a = ReplyDirectives {
            media_urls: vec!["a".into()],
            ..Default::default()
        };
        let b = ReplyDirectives {
            media_urls: vec!["b".into()],
            reply_to_id: Some("1".into()),
            audio_as_voice: true,
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.media_urls, vec!["a", "b"]);
        assert_eq!(a.reply_to_id.as_deref(), Some("1"));
        assert!(a.audio_as_voice);
    }
}
