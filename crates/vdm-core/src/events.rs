//! Event types: the outward sink consumed by a presentation layer and the
//! internal engine events carried from executor threads to the scheduler.

use crate::registry::{ItemId, ItemStatus, Progress};

/// Terminal result of one full outcome cycle for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The user cancelled the attempt; bypasses all retry logic.
    Canceled,
    /// Every fallback failed; carries the last raw error string.
    Failed(String),
}

/// Event emitted by an attempt executor, consumed only by the scheduler actor.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Progress { item: ItemId, progress: Progress },
    Status { item: ItemId, status: ItemStatus },
    Log { item: ItemId, line: String },
    Outcome { item: ItemId, outcome: Outcome },
}

/// Sink for per-item events, implemented by the presentation layer.
///
/// Called from the scheduler actor; implementations must not block for long
/// and must not call back into the batch handle.
pub trait EventSink: Send + Sync + 'static {
    fn on_progress(&self, _id: ItemId, _progress: Progress) {}
    fn on_status(&self, _id: ItemId, _status: &ItemStatus) {}
    fn on_log(&self, _id: ItemId, _line: &str) {}
    /// Raw attempt-cycle outcome, delivered before the retry disposition is applied.
    fn on_outcome(&self, _id: ItemId, _ok: bool, _error: &str) {}
    /// The pending queue and active map both drained; the batch is finished.
    fn on_batch_done(&self) {}
}

/// Sink that discards everything. Useful for headless embedding and tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}
