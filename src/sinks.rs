use crate::types::{BlockPayload, VisibleUpdate};
use tokio::sync::mpsc::UnboundedSender;

/// Outbound dispatch targets. Each sink is independently optional; absence
/// simply suppresses that output path. Sends are fire-and-forget: the
/// processor never waits on a receiver and never retries, and a dropped
/// receiver only produces a trace log.
#[derive(Clone, Default)]
pub struct SinkSet {
    pub visible: Option<UnboundedSender<VisibleUpdate>>,
    pub reasoning: Option<UnboundedSender<String>>,
    pub blocks: Option<UnboundedSender<BlockPayload>>,
    pub turn_start: Option<UnboundedSender<()>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_visible(&self) -> bool {
        self.visible.is_some()
    }

    pub fn has_reasoning(&self) -> bool {
        self.reasoning.is_some()
    }

    pub fn has_blocks(&self) -> bool {
        self.blocks.is_some()
    }

    pub(crate) fn emit_visible(&self, update: VisibleUpdate) {
        if let Some(tx) = &self.visible {
            if tx.send(update).is_err() {
                tracing::trace!("[SINK] Visible-text receiver dropped");
            }
        }
    }

    pub(crate) fn emit_reasoning(&self, text: String) {
        if let Some(tx) = &self.reasoning {
            if tx.send(text).is_err() {
                tracing::trace!("[SINK] Reasoning receiver dropped");
            }
        }
    }

    pub(crate) fn emit_block(&self, payload: BlockPayload) {
        if let Some(tx) = &self.blocks {
            if tx.send(payload).is_err() {
                tracing::trace!("[SINK] Block-delivery receiver dropped");
            }
        }
    }

    pub(crate) fn signal_turn_start(&self) {
        if let Some(tx) = &self.turn_start {
            if tx.send(()).is_err() {
                tracing::trace!("[SINK] Turn-start receiver dropped");
            }
        }
    }
}
