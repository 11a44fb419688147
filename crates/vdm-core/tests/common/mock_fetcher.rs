//! Scripted fetch engine: per-URL behaviors, attempt counting, and gates so
//! tests can hold an attempt open while they poke the scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vdm_core::fetch::{FetchError, FetchOptions, FetchSignal, Fetcher, MediaProbe};
use vdm_core::session::AttemptSession;

/// Latch a gated attempt waits on.
#[derive(Debug, Default)]
pub struct Release {
    released: AtomicBool,
}

impl Release {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }
}

/// What the fetcher does for a URL, per attempt.
#[derive(Clone)]
pub enum Behavior {
    /// Emit a short progress ramp and succeed.
    Succeed,
    /// Fail every attempt with this message.
    AlwaysFail(&'static str),
    /// Fail the first `n` attempts, then succeed.
    FailFirst(usize),
    /// Emit some progress, then hold (checkpointing) until released.
    Gated(Arc<Release>),
    /// Replay these raw signals, then succeed.
    Signals(Vec<FetchSignal>),
}

#[derive(Default)]
pub struct MockFetcher {
    behaviors: Mutex<HashMap<String, Behavior>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set (or replace) the behavior for a URL. Unconfigured URLs succeed.
    pub fn behave(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    /// Number of attempts made against a URL so far (fallback steps count).
    pub fn attempts(&self, url: &str) -> usize {
        self.attempts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn ramp(
        session: &AttemptSession,
        on_signal: &mut dyn FnMut(FetchSignal),
    ) -> Result<(), FetchError> {
        for downloaded in [25u64, 50, 100] {
            session.checkpoint()?;
            on_signal(FetchSignal::Downloading {
                downloaded,
                total: Some(100),
            });
        }
        on_signal(FetchSignal::Finished);
        Ok(())
    }
}

impl Fetcher for MockFetcher {
    fn probe(&self, _url: &str, _options: &FetchOptions) -> Result<MediaProbe, FetchError> {
        Ok(MediaProbe {
            id: Some("media01".to_string()),
            title: Some("Test Media".to_string()),
        })
    }

    fn attempt(
        &self,
        url: &str,
        _options: &FetchOptions,
        session: &AttemptSession,
        on_signal: &mut dyn FnMut(FetchSignal),
    ) -> Result<(), FetchError> {
        session.checkpoint()?;

        let count = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Self::ramp(session, on_signal),
            Behavior::AlwaysFail(msg) => Err(FetchError::Failed(msg.to_string())),
            Behavior::FailFirst(n) => {
                if count <= n {
                    Err(FetchError::Failed(format!("scripted failure {count}")))
                } else {
                    Self::ramp(session, on_signal)
                }
            }
            Behavior::Gated(release) => {
                on_signal(FetchSignal::Downloading {
                    downloaded: 10,
                    total: Some(100),
                });
                while !release.is_released() {
                    session.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(10));
                }
                session.checkpoint()?;
                on_signal(FetchSignal::Downloading {
                    downloaded: 100,
                    total: Some(100),
                });
                on_signal(FetchSignal::Finished);
                Ok(())
            }
            Behavior::Signals(signals) => {
                for signal in signals {
                    session.checkpoint()?;
                    on_signal(signal);
                }
                Ok(())
            }
        }
    }
}
