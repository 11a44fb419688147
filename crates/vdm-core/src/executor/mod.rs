//! One attempt cycle for one item, run to a terminal outcome on a blocking
//! worker thread.
//!
//! The cycle is: probe for the remote id, primary attempt, one uncounted
//! recovery attempt after a stale-range conflict, then the platform's
//! fallback chain in order. Every exit path reports exactly one outcome
//! through the engine event channel; nothing here touches scheduler state.

pub mod progress;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::events::{EngineEvent, Outcome};
use crate::fetch::{FetchError, FetchOptions, FetchSignal, Fetcher};
use crate::registry::{ItemId, Progress};
use crate::retry::{self, advisory_hint, stale_range_conflict, FallbackStep};
use crate::session::AttemptSession;
use crate::storage;

use progress::{GateEvent, ProgressGate};

/// Executes one outcome cycle for one item.
pub struct AttemptExecutor {
    pub item: ItemId,
    pub url: String,
    pub base: FetchOptions,
    pub chain: Vec<FallbackStep>,
    pub fetcher: Arc<dyn Fetcher>,
    pub session: Arc<AttemptSession>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
}

impl AttemptExecutor {
    /// Run the cycle on a dedicated blocking thread. Returns immediately;
    /// the outcome arrives asynchronously on the event channel.
    pub fn spawn(self) {
        tokio::task::spawn_blocking(move || self.run());
    }

    /// Blocking entry point; also callable directly from tests.
    pub fn run(self) {
        self.send(EngineEvent::Progress {
            item: self.item,
            progress: Progress::Indeterminate,
        });
        self.log(format!("start download: {}", self.url));

        let media_id = self
            .fetcher
            .probe(&self.url, &self.base)
            .ok()
            .and_then(|probe| probe.id)
            .unwrap_or_default();

        let mut gate = ProgressGate::new();
        let outcome = self.drive(&mut gate, &media_id);
        self.send(EngineEvent::Outcome {
            item: self.item,
            outcome,
        });
    }

    fn drive(&self, gate: &mut ProgressGate, media_id: &str) -> Outcome {
        let mut last_error = match self.run_attempt(&self.base, gate) {
            Ok(()) => return self.succeed(gate, "primary attempt"),
            Err(FetchError::Canceled) => return self.canceled(),
            Err(FetchError::Failed(msg)) => {
                self.log(format!("first attempt failed: {msg}"));
                if let Some(hint) = advisory_hint(&msg) {
                    self.log(format!("hint: {}", hint.advice()));
                }
                msg
            }
        };

        if stale_range_conflict(&last_error) {
            match storage::purge_stale_partials(&self.base.output_dir, media_id) {
                Ok(n) if n > 0 => self.log(format!("removed {n} stale partial file(s)")),
                Ok(_) => {}
                Err(e) => self.log(format!("partial cleanup failed: {e}")),
            }
            match self.run_attempt(&retry::range_recovery(&self.base), gate) {
                Ok(()) => return self.succeed(gate, "fresh retry after range conflict"),
                Err(FetchError::Canceled) => return self.canceled(),
                Err(FetchError::Failed(msg)) => {
                    self.log(format!("fresh retry after range conflict failed: {msg}"));
                    last_error = msg;
                }
            }
        }

        for step in &self.chain {
            self.log(format!("retrying via {}", step.label));
            match self.run_attempt(&step.delta.apply(&self.base), gate) {
                Ok(()) => return self.succeed(gate, step.label),
                Err(FetchError::Canceled) => return self.canceled(),
                Err(FetchError::Failed(msg)) => {
                    self.log(format!("fallback {} failed: {msg}", step.label));
                    last_error = msg;
                }
            }
        }

        self.log("cannot download after retries");
        Outcome::Failed(last_error)
    }

    fn run_attempt(&self, options: &FetchOptions, gate: &mut ProgressGate) -> Result<(), FetchError> {
        let mut on_signal = |signal: FetchSignal| {
            for event in gate.translate(signal) {
                self.forward(event);
            }
        };
        self.fetcher
            .attempt(&self.url, options, &self.session, &mut on_signal)
    }

    fn succeed(&self, gate: &mut ProgressGate, label: &str) -> Outcome {
        if let Some(event) = gate.complete() {
            self.forward(event);
        }
        self.log(format!("done ({label})"));
        Outcome::Success
    }

    fn canceled(&self) -> Outcome {
        self.log("canceled by user");
        Outcome::Canceled
    }

    fn forward(&self, event: GateEvent) {
        match event {
            GateEvent::Progress(progress) => self.send(EngineEvent::Progress {
                item: self.item,
                progress,
            }),
            GateEvent::Status(status) => self.send(EngineEvent::Status {
                item: self.item,
                status,
            }),
        }
    }

    fn log(&self, line: impl Into<String>) {
        self.send(EngineEvent::Log {
            item: self.item,
            line: line.into(),
        });
    }

    fn send(&self, event: EngineEvent) {
        // The scheduler may already be gone during shutdown; dropping the
        // event is the correct behavior then.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VdmConfig;
    use crate::fetch::options::{base_options, FetchBackend, FetchEnv};
    use crate::fetch::MediaProbe;
    use crate::platform::Platform;
    use crate::registry::QualityTier;
    use crate::retry::fallback_chain;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Scripted fetcher: pops one result per attempt and records what it saw.
    struct ScriptFetcher {
        results: Mutex<Vec<Result<(), String>>>,
        seen: Mutex<Vec<FetchOptions>>,
    }

    impl ScriptFetcher {
        fn new(results: Vec<Result<(), String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<FetchOptions> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Fetcher for ScriptFetcher {
        fn probe(&self, _url: &str, _options: &FetchOptions) -> Result<MediaProbe, FetchError> {
            Ok(MediaProbe {
                id: Some("vid123".to_string()),
                title: Some("A Video".to_string()),
            })
        }

        fn attempt(
            &self,
            _url: &str,
            options: &FetchOptions,
            session: &AttemptSession,
            on_signal: &mut dyn FnMut(FetchSignal),
        ) -> Result<(), FetchError> {
            session.checkpoint()?;
            self.seen.lock().unwrap().push(options.clone());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                return Err(FetchError::Failed("script exhausted".to_string()));
            }
            match results.remove(0) {
                Ok(()) => {
                    on_signal(FetchSignal::Downloading {
                        downloaded: 100,
                        total: Some(100),
                    });
                    on_signal(FetchSignal::Finished);
                    Ok(())
                }
                Err(msg) => Err(FetchError::Failed(msg)),
            }
        }
    }

    fn executor_for(
        fetcher: Arc<ScriptFetcher>,
        platform: Platform,
        output_dir: &Path,
    ) -> (AttemptExecutor, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let env = FetchEnv {
            transcoder: Some(PathBuf::from("/usr/bin/ffmpeg")),
            ..FetchEnv::default()
        };
        let base = base_options(
            platform,
            QualityTier::P1080,
            None,
            false,
            output_dir,
            &VdmConfig::default(),
            &env,
        );
        let session = AttemptSession::new(1, tx.clone());
        let executor = AttemptExecutor {
            item: 1,
            url: "https://example.com/v".to_string(),
            base,
            chain: fallback_chain(platform, false),
            fetcher,
            session,
            events: tx,
        };
        (executor, rx)
    }

    fn final_outcome(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Outcome {
        let mut outcome = None;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Outcome { outcome: o, .. } = event {
                outcome = Some(o);
            }
        }
        outcome.expect("executor always reports an outcome")
    }

    #[test]
    fn primary_success_reports_success_and_full_progress() {
        let fetcher = ScriptFetcher::new(vec![Ok(())]);
        let dir = tempfile::tempdir().unwrap();
        let (executor, mut rx) = executor_for(Arc::clone(&fetcher), Platform::Other, dir.path());
        executor.run();

        let mut saw_hundred = false;
        let mut outcome = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::Progress {
                    progress: Progress::Percent(100),
                    ..
                } => saw_hundred = true,
                EngineEvent::Outcome { outcome: o, .. } => outcome = Some(o),
                _ => {}
            }
        }
        assert!(saw_hundred);
        assert_eq!(outcome, Some(Outcome::Success));
        assert_eq!(fetcher.seen().len(), 1);
    }

    #[test]
    fn fallback_chain_walked_in_order_until_success() {
        // Other platform: chain is just the recode step.
        let fetcher = ScriptFetcher::new(vec![Err("no stream".to_string()), Ok(())]);
        let dir = tempfile::tempdir().unwrap();
        let (executor, mut rx) = executor_for(Arc::clone(&fetcher), Platform::Other, dir.path());
        executor.run();

        assert_eq!(final_outcome(&mut rx), Outcome::Success);
        let seen = fetcher.seen();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].post.recode_h264);
        assert!(seen[1].post.recode_h264);
    }

    #[test]
    fn exhausted_chain_fails_with_last_error() {
        let fetcher = ScriptFetcher::new(vec![
            Err("first".to_string()),
            Err("second".to_string()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let (executor, mut rx) = executor_for(fetcher, Platform::Other, dir.path());
        executor.run();
        assert_eq!(final_outcome(&mut rx), Outcome::Failed("second".to_string()));
    }

    #[test]
    fn stale_range_purges_partials_and_retries_without_resume() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("A Video [vid123].f137.mp4.part");
        std::fs::write(&stale, b"x").unwrap();

        let fetcher = ScriptFetcher::new(vec![
            Err("HTTP Error 416: Requested Range Not Satisfiable".to_string()),
            Ok(()),
        ]);
        let (executor, mut rx) = executor_for(Arc::clone(&fetcher), Platform::Other, dir.path());
        executor.run();

        assert_eq!(final_outcome(&mut rx), Outcome::Success);
        assert!(!stale.exists());
        let seen = fetcher.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].tuning.resume);
        assert!(!seen[1].tuning.resume);
        assert_eq!(seen[1].tuning.concurrent_fragments, 1);
    }

    #[test]
    fn cancellation_stops_the_chain_immediately() {
        let fetcher = ScriptFetcher::new(vec![Ok(())]);
        let dir = tempfile::tempdir().unwrap();
        let (executor, mut rx) = executor_for(Arc::clone(&fetcher), Platform::Other, dir.path());
        executor.session.cancel();
        executor.run();

        assert_eq!(final_outcome(&mut rx), Outcome::Canceled);
        // The checkpoint aborted before any attempt was recorded.
        assert!(fetcher.seen().is_empty());
    }

    #[test]
    fn instagram_fallbacks_switch_backends() {
        let fetcher = ScriptFetcher::new(vec![
            Err("login_required".to_string()),
            Err("still broken".to_string()),
            Ok(()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let (executor, mut rx) = executor_for(Arc::clone(&fetcher), Platform::Instagram, dir.path());
        executor.run();

        assert_eq!(final_outcome(&mut rx), Outcome::Success);
        let seen = fetcher.seen();
        assert_eq!(seen[0].backend, FetchBackend::Native);
        assert_eq!(seen[1].backend, FetchBackend::Instaloader);
        assert_eq!(seen[2].backend, FetchBackend::GalleryDl);
    }
}
