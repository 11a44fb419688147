//! Shared test helpers: a scripted fetcher and a recording event sink.

pub mod mock_fetcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use vdm_core::events::EventSink;
use vdm_core::registry::{ItemId, ItemStatus, Progress};

/// Everything the scheduler told the presentation layer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Progress(ItemId, Progress),
    Status(ItemId, ItemStatus),
    Log(ItemId, String),
    Outcome(ItemId, bool, String),
    BatchDone,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    done: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses_for(&self, id: ItemId) -> Vec<ItemStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Status(i, s) if i == id => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn progress_for(&self, id: ItemId) -> Vec<Progress> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(i, p) if i == id => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Poll until the batch-done event arrives.
    pub async fn wait_done(&self, timeout: Duration) {
        let deadline = std::time::Instant::now() + timeout;
        while !self.is_done() {
            assert!(
                std::time::Instant::now() < deadline,
                "batch did not finish in time; events so far: {:?}",
                self.events()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl EventSink for RecordingSink {
    fn on_progress(&self, id: ItemId, progress: Progress) {
        self.events.lock().unwrap().push(SinkEvent::Progress(id, progress));
    }

    fn on_status(&self, id: ItemId, status: &ItemStatus) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Status(id, status.clone()));
    }

    fn on_log(&self, id: ItemId, line: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Log(id, line.to_string()));
    }

    fn on_outcome(&self, id: ItemId, ok: bool, error: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Outcome(id, ok, error.to_string()));
    }

    fn on_batch_done(&self) {
        self.events.lock().unwrap().push(SinkEvent::BatchDone);
        self.done.store(true, Ordering::Relaxed);
    }
}
