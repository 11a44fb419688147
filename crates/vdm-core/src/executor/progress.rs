//! Normalizes raw fetch signals into deduplicated progress and status events.
//!
//! The gate guarantees the event stream stays bounded by actual change: a
//! percent value never repeats consecutively, indeterminate is reported at
//! most once, and the Downloading/Merging transitions fire exactly once per
//! executor run even when fallback attempts restart the transfer.

use crate::fetch::FetchSignal;
use crate::registry::{ItemStatus, Progress};

/// Normalized event produced by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    Progress(Progress),
    Status(ItemStatus),
}

/// Per-executor-run dedup state.
#[derive(Debug, Default)]
pub struct ProgressGate {
    last_percent: Option<u8>,
    sent_indeterminate: bool,
    sent_downloading: bool,
    sent_merging: bool,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one raw signal into zero or more events to forward.
    pub fn translate(&mut self, signal: FetchSignal) -> Vec<GateEvent> {
        let mut out = Vec::new();
        match signal {
            FetchSignal::Downloading { downloaded, total } => {
                match total {
                    Some(total) => {
                        let pct = (downloaded.saturating_mul(100) / total.max(1)).min(100) as u8;
                        if self.last_percent != Some(pct) {
                            self.last_percent = Some(pct);
                            out.push(GateEvent::Progress(Progress::Percent(pct)));
                        }
                    }
                    None => {
                        if !self.sent_indeterminate {
                            self.sent_indeterminate = true;
                            out.push(GateEvent::Progress(Progress::Indeterminate));
                        }
                    }
                }
                if !self.sent_downloading {
                    self.sent_downloading = true;
                    out.push(GateEvent::Status(ItemStatus::Downloading));
                }
            }
            FetchSignal::Finished => {
                if !self.sent_merging {
                    self.sent_merging = true;
                    out.push(GateEvent::Status(ItemStatus::Merging));
                }
            }
        }
        out
    }

    /// Final 100% emission for a successful cycle, unless already there.
    pub fn complete(&mut self) -> Option<GateEvent> {
        if self.last_percent == Some(100) {
            return None;
        }
        self.last_percent = Some(100);
        Some(GateEvent::Progress(Progress::Percent(100)))
    }
}
