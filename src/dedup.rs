use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Whitespace/case-insensitive comparison form: surrounding whitespace
/// stripped, runs of whitespace collapsed, case folded.
pub fn normalize_for_comparison(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Membership set of content already pushed through a side-channel delivery
/// path. Keys are sha256 digests of the normalized text, so the ledger
/// never retains delivered content itself.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: HashSet<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(text: &str) -> String {
        let normalized = normalize_for_comparison(text);
        format!("{:x}", Sha256::digest(normalized.as_bytes()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn record(&mut self, key: String) {
        self.seen.insert(key);
    }

    pub fn has_text(&self, text: &str) -> bool {
        self.has(&Self::key(text))
    }

    pub fn record_text(&mut self, text: &str) {
        self.record(Self::key(text));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_for_comparison("  Hello   World \n"),
            "hello world"
        );
    }

    #[test]
    fn test_recorded_text_matches_equivalent_forms() {
        let mut ledger = DedupLedger::new();
        ledger.record_text("Hello World");
        assert!(ledger.has_text("hello   world"));
        assert!(ledger.has_text("  HELLO WORLD  "));
        assert!(!ledger.has_text("hello worlds"));
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut ledger = DedupLedger::new();
        ledger.record_text("same");
        ledger.record_text("SAME");
        assert_eq!(ledger.len(), 1);
    }
}
