//! Delivery-block accumulation.
//!
//! Buffers visible text and segments it into delivery-sized blocks at
//! paragraph boundaries, consulting the tag-state scanner so a block never
//! splits inside an open thinking/final region or inline code span.

use crate::tag_state::TagState;

#[derive(Debug, Default)]
pub struct BlockChunker {
    /// Visible (tag-stripped) text not yet delivered
    buffer: String,
    tag_state: TagState,
    /// Byte offsets just past each paragraph boundary that fell at a clean
    /// scanner state. Blocks are only ever cut at these offsets.
    safe_breaks: Vec<usize>,
}

impl BlockChunker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &str) {
        // Feed paragraph-sized pieces so cleanliness is checked exactly at
        // each boundary, not just at the chunk end.
        for piece in chunk.split_inclusive("\n\n") {
            let visible = self.tag_state.apply(piece);
            self.buffer.push_str(&visible);
            if piece.ends_with("\n\n") && self.tag_state.is_clean() {
                self.safe_breaks.push(self.buffer.len());
            }
        }
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.trim().is_empty()
    }

    /// Emits buffered blocks. Non-forced drains stop at the last safe
    /// paragraph boundary and are a no-op when none exists; a forced drain
    /// resolves the scanner tail and emits everything.
    pub fn drain(&mut self, force: bool, mut emit: impl FnMut(&str)) {
        if force {
            let tail = self.tag_state.flush();
            self.buffer.push_str(&tail);
        }
        let mut cuts = std::mem::take(&mut self.safe_breaks);
        if force {
            cuts.push(self.buffer.len());
        }
        let last = match cuts.last() {
            Some(&offset) if offset > 0 => offset,
            _ => return,
        };

        let drained: String = self.buffer.drain(..last).collect();
        let mut prev = 0;
        for &cut in &cuts {
            if cut > prev && cut <= last {
                let block = drained[prev..cut].trim();
                if !block.is_empty() {
                    emit(block);
                }
                prev = cut;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunker: &mut BlockChunker, force: bool) -> Vec<String> {
        let mut out = Vec::new();
        chunker.drain(force, |block| out.push(block.to_string()));
        out
    }

    #[test]
    fn test_non_forced_drain_emits_complete_paragraphs() {
        let mut chunker = BlockChunker::new();
        chunker.append("First block.\n\nSecond block.\n\nstill typi");
        assert_eq!(
            collect(&mut chunker, false),
            vec!["First block.", "Second block."]
        );
        assert!(chunker.has_buffered());
        assert_eq!(collect(&mut chunker, true), vec!["still typi"]);
    }

    #[test]
    fn test_non_forced_drain_without_boundary_is_noop() {
        let mut chunker = BlockChunker::new();
        chunker.append("one unfinished paragraph");
        assert!(collect(&mut chunker, false).is_empty());
        assert!(chunker.has_buffered());
    }

    #[test]
    fn test_drain_is_idempotent_without_new_input() {
        let mut chunker = BlockChunker::new();
        chunker.append("done.\n\ntail");
        assert_eq!(collect(&mut chunker, false), vec!["done."]);
        assert!(collect(&mut chunker, false).is_empty());
        assert!(collect(&mut chunker, false).is_empty());
    }

    #[test]
    fn test_never_splits_inside_code_fence() {
        let mut chunker = BlockChunker::new();
        chunker.append("```\nlet a = 1;\n\nlet b = 2;\n``` trailer\n\nnext paragraph\n\n");
        let blocks = collect(&mut chunker, false);
        assert_eq!(
            blocks,
            vec![
                "```\nlet a = 1;\n\nlet b = 2;\n``` trailer",
                "next paragraph"
            ]
        );
    }

    #[test]
    fn test_never_splits_inside_open_tag_region() {
        let mut chunker = BlockChunker::new();
        chunker.append("<final>part one\n\npart two");
        // The boundary is inside the still-open final region: not safe.
        assert!(collect(&mut chunker, false).is_empty());
        chunker.append("</final>\n\n");
        assert_eq!(collect(&mut chunker, false), vec!["part one\n\npart two"]);
    }

    #[test]
    fn test_thinking_text_is_never_buffered() {
        let mut chunker = BlockChunker::new();
        chunker.append("<thinking>hidden\n\nstill hidden</thinking>shown");
        assert_eq!(collect(&mut chunker, true), vec!["shown"]);
    }

    #[test]
    fn test_forced_drain_emits_single_remainder_block() {
        let mut chunker = BlockChunker::new();
        chunker.append("no boundary here");
        assert_eq!(collect(&mut chunker, true), vec!["no boundary here"]);
        assert!(!chunker.has_buffered());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut chunker = BlockChunker::new();
        chunker.append("<thinking>open");
        chunker.reset();
        chunker.append("fresh\n\n");
        assert_eq!(collect(&mut chunker, false), vec!["fresh"]);
    }
}
