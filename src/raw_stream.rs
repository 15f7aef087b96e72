//! Raw-stream tap: a bounded, timestamped record of every text event and
//! finalized message a processor saw, kept for repro capture and tests.
//! Entries hold truncated snapshots, not full payloads.

use crate::constants::RAW_TAP_CAPACITY;
use crate::str_utils::first_n_chars_lossy;
use crate::types::{Result, RunId, SessionId, UpdateKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

const SNAPSHOT_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum RawStreamRecord {
    TextStream {
        kind: UpdateKind,
        delta: String,
        content: String,
    },
    MessageEnd {
        text: String,
        thinking: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RawStreamEntry {
    pub ts: DateTime<Utc>,
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub record: RawStreamRecord,
}

#[derive(Debug)]
pub struct RawStreamTap {
    run_id: RunId,
    session_id: Option<SessionId>,
    entries: VecDeque<RawStreamEntry>,
    capacity: usize,
}

impl RawStreamTap {
    pub fn new(run_id: RunId, session_id: Option<SessionId>) -> Self {
        Self::with_capacity(run_id, session_id, RAW_TAP_CAPACITY)
    }

    pub fn with_capacity(run_id: RunId, session_id: Option<SessionId>, capacity: usize) -> Self {
        Self {
            run_id,
            session_id,
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record_text_stream(&mut self, kind: UpdateKind, delta: &str, content: &str) {
        self.push(RawStreamRecord::TextStream {
            kind,
            delta: first_n_chars_lossy(delta, SNAPSHOT_CHARS).into_owned(),
            content: first_n_chars_lossy(content, SNAPSHOT_CHARS).into_owned(),
        });
    }

    pub fn record_message_end(&mut self, text: &str, thinking: &str) {
        self.push(RawStreamRecord::MessageEnd {
            text: first_n_chars_lossy(text, SNAPSHOT_CHARS).into_owned(),
            thinking: first_n_chars_lossy(thinking, SNAPSHOT_CHARS).into_owned(),
        });
    }

    fn push(&mut self, record: RawStreamRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(RawStreamEntry {
            ts: Utc::now(),
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            record,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &RawStreamEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn export_json(&self) -> Result<String> {
        let entries: Vec<&RawStreamEntry> = self.entries.iter().collect();
        Ok(serde_json::to_string(&entries)?)
    }
}
