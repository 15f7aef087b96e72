use crate::types::RunId;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Per-message stream counters, logged as one summary line when
/// message-end processing completes.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    pub updates: usize,
    pub appended_chars: usize,
    pub visible_emits: usize,
    pub visible_chars: usize,
    pub suppressed_updates: usize,
    pub reasoning_chars: usize,
    pub blocks_emitted: usize,
    pub deduped_blocks: usize,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_update(&mut self, appended_chars: usize) {
        self.updates += 1;
        self.appended_chars += appended_chars;
    }

    pub fn record_visible(&mut self, delta_chars: usize) {
        self.visible_emits += 1;
        self.visible_chars += delta_chars;
    }

    pub fn record_suppressed(&mut self) {
        self.suppressed_updates += 1;
    }

    pub fn record_reasoning(&mut self, chars: usize) {
        self.reasoning_chars += chars;
    }

    pub fn record_block(&mut self) {
        self.blocks_emitted += 1;
    }

    pub fn record_deduped(&mut self) {
        self.deduped_blocks += 1;
    }

    pub fn log_summary(&self, run_id: &RunId) {
        info!(
            target: "flight_recorder",
            "[STREAM END] Run: {} | Updates: {} ({} chars) | Visible: {} events / {} chars | Suppressed: {} | Blocks: {} (+{} deduped) | Reasoning: {} chars",
            run_id.short(),
            self.updates,
            self.appended_chars,
            self.visible_emits,
            self.visible_chars,
            self.suppressed_updates,
            self.blocks_emitted,
            self.deduped_blocks,
            self.reasoning_chars
        );
    }
}
