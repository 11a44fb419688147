//! Terminal event sink: one status line per transition, progress printed in
//! coarse steps so large batches stay readable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use vdm_core::events::EventSink;
use vdm_core::registry::{ItemId, ItemStatus, Progress};

/// How much progress must accumulate before another percent line is printed.
const PROGRESS_STEP: u8 = 10;

#[derive(Default)]
pub struct ConsoleSink {
    done: AtomicBool,
    last_printed: Mutex<HashMap<ItemId, u8>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the batch-done event.
    pub async fn wait_done(&self) {
        while !self.done.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl EventSink for ConsoleSink {
    fn on_progress(&self, id: ItemId, progress: Progress) {
        let Progress::Percent(pct) = progress else {
            return;
        };
        let mut last = self.last_printed.lock().unwrap();
        let prev = last.get(&id).copied();
        let print = match prev {
            None => true,
            Some(prev) => pct >= prev.saturating_add(PROGRESS_STEP) || (pct == 100 && prev != 100),
        };
        if print {
            last.insert(id, pct);
            println!("[{id}] {pct}%");
        }
    }

    fn on_status(&self, id: ItemId, status: &ItemStatus) {
        println!("[{id}] {status}");
        if status.is_terminal() {
            self.last_printed.lock().unwrap().remove(&id);
        }
    }

    fn on_log(&self, id: ItemId, line: &str) {
        tracing::info!(item = id, "{line}");
    }

    fn on_outcome(&self, id: ItemId, ok: bool, error: &str) {
        if !ok && !error.is_empty() {
            tracing::warn!(item = id, "attempt cycle failed: {error}");
        }
    }

    fn on_batch_done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
}
