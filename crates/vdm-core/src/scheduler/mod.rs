//! The scheduler actor: single owner of the pending queue, the active map
//! and all item state.
//!
//! Every mutation — batch operations arriving as commands, progress and
//! outcomes arriving from executor threads — is applied on this one task,
//! so no lock guards the registry and no executor ever touches shared
//! state directly. Slots refill exclusively through `admit`, which runs
//! after every outcome; that is the sole re-entry point that advances the
//! queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::VdmConfig;
use crate::events::{EngineEvent, EventSink, Outcome};
use crate::executor::AttemptExecutor;
use crate::fetch::options::{self, FetchEnv};
use crate::fetch::Fetcher;
use crate::platform::Platform;
use crate::registry::{
    BatchStats, Item, ItemId, ItemKind, ItemSpec, ItemStatus, Progress, Registry,
};
use crate::retry::{fallback_chain, Disposition, Final, RetryPolicy};
use crate::session::AttemptSession;

/// Hard ceiling on concurrent workers, regardless of configuration.
pub const WORKER_CEILING: usize = 20;

fn clamp_workers(n: usize) -> usize {
    n.clamp(1, WORKER_CEILING)
}

/// Batch operation delivered to the scheduler actor.
#[derive(Debug)]
pub enum Command {
    AddItems {
        specs: Vec<ItemSpec>,
        reply: oneshot::Sender<Vec<ItemId>>,
    },
    SetSelected {
        ids: Vec<ItemId>,
        selected: bool,
    },
    StartAll,
    PauseAll,
    ResumeAll,
    StopSelected {
        ids: Vec<ItemId>,
    },
    StopAll,
    RetryFailed,
    RemoveItems {
        ids: Vec<ItemId>,
    },
    RemoveCompleted {
        reply: oneshot::Sender<usize>,
    },
    Clear {
        force: bool,
    },
    SetConcurrency {
        workers: usize,
    },
    SetMaxRetries {
        max: u32,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Item>>,
    },
    Stats {
        reply: oneshot::Sender<BatchStats>,
    },
    Shutdown,
}

/// Scheduler state. Constructed by `batch::Batch::spawn` and consumed by
/// `run` on its own task.
pub struct Scheduler {
    cfg: VdmConfig,
    env: FetchEnv,
    output_dir: PathBuf,
    registry: Registry,
    pending: VecDeque<ItemId>,
    active: HashMap<ItemId, Arc<AttemptSession>>,
    running: bool,
    paused: bool,
    max_workers: usize,
    policy: RetryPolicy,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn EventSink>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl Scheduler {
    pub fn new(
        cfg: VdmConfig,
        output_dir: PathBuf,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn EventSink>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let env = FetchEnv::detect(&cfg);
        let max_workers = clamp_workers(cfg.max_workers);
        let policy = RetryPolicy {
            max_retries: cfg.max_retries,
        };
        Self {
            cfg,
            env,
            output_dir,
            registry: Registry::new(),
            pending: VecDeque::new(),
            active: HashMap::new(),
            running: false,
            paused: false,
            max_workers,
            policy,
            fetcher,
            sink,
            events_tx,
        }
    }

    /// Actor loop: commands from the batch handle, events from executors.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(Command::Shutdown) | None => {
                            self.cancel_all_active();
                            return;
                        }
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::AddItems { specs, reply } => {
                let ids = self.add_items(specs);
                let _ = reply.send(ids);
            }
            Command::SetSelected { ids, selected } => {
                for id in ids {
                    if let Some(item) = self.registry.get_mut(id) {
                        item.selected = selected;
                    }
                }
            }
            Command::StartAll => self.start_all(),
            Command::PauseAll => self.pause_all(),
            Command::ResumeAll => self.resume_all(),
            Command::StopSelected { ids } => self.stop_selected(ids),
            Command::StopAll => self.stop_all(),
            Command::RetryFailed => self.retry_failed(),
            Command::RemoveItems { ids } => self.remove_items(ids),
            Command::RemoveCompleted { reply } => {
                let _ = reply.send(self.remove_completed());
            }
            Command::Clear { force } => self.clear(force),
            Command::SetConcurrency { workers } => {
                self.max_workers = clamp_workers(workers);
                if self.running && !self.paused {
                    self.admit();
                }
            }
            Command::SetMaxRetries { max } => {
                self.policy.max_retries = max;
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.iter().cloned().collect());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Progress { item, progress } => self.set_progress(item, progress),
            EngineEvent::Status { item, status } => {
                // Status transitions only apply while the attempt is live;
                // stragglers from a cancelled executor are dropped.
                if self.active.contains_key(&item) {
                    self.set_status(item, status);
                }
            }
            EngineEvent::Log { item, line } => {
                tracing::debug!(item, "{line}");
                self.sink.on_log(item, &line);
            }
            EngineEvent::Outcome { item, outcome } => self.on_outcome(item, outcome),
        }
    }

    // ----- item creation -----

    fn add_items(&mut self, specs: Vec<ItemSpec>) -> Vec<ItemId> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            // Bulk adds dedupe primary URLs; grouped variants may repeat one.
            if spec.kind == ItemKind::Main && self.registry.contains_url(&spec.url) {
                continue;
            }
            ids.push(self.registry.create(spec));
        }
        ids
    }

    // ----- batch lifecycle -----

    fn start_all(&mut self) {
        if self.running || self.registry.is_empty() {
            return;
        }
        self.running = true;
        self.paused = false;
        self.pending.clear();

        let rows: Vec<(ItemId, bool, ItemKind)> = self
            .registry
            .iter()
            .map(|item| (item.id, item.selected, item.kind))
            .collect();

        for (id, selected, kind) in rows {
            if let Some(item) = self.registry.get_mut(id) {
                item.retry_count = 0;
                item.last_error = None;
            }
            if !selected {
                self.set_status(id, ItemStatus::SkippedUnselected);
                self.set_progress(id, Progress::Percent(0));
            } else if kind == ItemKind::Preventive {
                self.set_status(id, ItemStatus::Waiting);
                self.set_progress(id, Progress::Percent(0));
            } else {
                self.set_status(id, ItemStatus::Queued);
                self.set_progress(id, Progress::Indeterminate);
                self.pending.push_back(id);
            }
        }

        tracing::info!(
            queued = self.pending.len(),
            workers = self.max_workers,
            "batch started"
        );
        self.admit();
    }

    /// Refill free worker slots from the pending queue, FIFO. Stops
    /// immediately while paused or stopped; never admits speculatively.
    fn admit(&mut self) {
        while self.running && !self.paused && self.active.len() < self.max_workers {
            let Some(id) = self.pending.pop_front() else {
                if self.active.is_empty() {
                    self.running = false;
                    tracing::info!("batch finished");
                    self.sink.on_batch_done();
                }
                return;
            };
            // The item may have been removed while queued.
            if self.registry.get(id).is_none() {
                continue;
            }
            self.spawn_attempt(id);
        }
    }

    fn spawn_attempt(&mut self, id: ItemId) {
        let Some(item) = self.registry.get(id) else {
            return;
        };
        let platform = Platform::detect(&item.url);
        let audio_only = item.kind == ItemKind::Sound;
        let base = options::base_options(
            platform,
            item.quality,
            item.output_name.as_deref(),
            audio_only,
            &self.output_dir,
            &self.cfg,
            &self.env,
        );
        let chain = fallback_chain(platform, self.env.cookies_for(platform).is_some());
        let url = item.url.clone();

        let session = AttemptSession::new(id, self.events_tx.clone());
        self.active.insert(id, Arc::clone(&session));
        self.set_status(id, ItemStatus::Starting);

        AttemptExecutor {
            item: id,
            url,
            base,
            chain,
            fetcher: Arc::clone(&self.fetcher),
            session,
            events: self.events_tx.clone(),
        }
        .spawn();
    }

    fn pause_all(&mut self) {
        if !self.running {
            return;
        }
        self.paused = true;
        for session in self.active.values() {
            session.pause();
        }
        tracing::info!(active = self.active.len(), "paused all");
    }

    fn resume_all(&mut self) {
        if !self.running {
            return;
        }
        self.paused = false;
        for session in self.active.values() {
            session.resume();
        }
        tracing::info!(active = self.active.len(), "resumed");
        self.admit();
    }

    fn stop_selected(&mut self, ids: Vec<ItemId>) {
        for id in &ids {
            if let Some(session) = self.active.get(id) {
                session.cancel();
            }
        }

        // Ids without an executor are pulled straight out of the queue and
        // marked Canceled here, since no outcome will arrive for them.
        let banned: HashSet<ItemId> = ids
            .iter()
            .copied()
            .filter(|id| !self.active.contains_key(id))
            .collect();
        let was_queued: Vec<ItemId> = self
            .pending
            .iter()
            .copied()
            .filter(|id| banned.contains(id))
            .collect();
        self.pending.retain(|id| !banned.contains(id));
        for id in was_queued {
            self.set_status(id, ItemStatus::Canceled);
            self.set_progress(id, Progress::Percent(0));
        }

        if self.running && !self.paused {
            self.admit();
        }
    }

    fn stop_all(&mut self) {
        for session in self.active.values() {
            session.cancel();
        }
        let drained: Vec<ItemId> = self.pending.drain(..).collect();
        for id in drained {
            self.set_status(id, ItemStatus::Canceled);
            self.set_progress(id, Progress::Percent(0));
        }
        self.running = false;
        tracing::info!("stopped all");
    }

    fn retry_failed(&mut self) {
        let failed = self.registry.ids_where(|i| i.status == ItemStatus::Error);
        if failed.is_empty() {
            return;
        }
        tracing::info!(count = failed.len(), "retrying failed items");
        for id in failed {
            if let Some(item) = self.registry.get_mut(id) {
                item.retry_count = 0;
                item.last_error = None;
            }
            self.set_status(id, ItemStatus::Queued);
            self.set_progress(id, Progress::Indeterminate);
            self.pending.push_back(id);
        }
        if !self.running {
            self.running = true;
            self.paused = false;
        }
        self.admit();
    }

    // ----- removal -----

    fn remove_items(&mut self, ids: Vec<ItemId>) {
        for id in ids {
            if self.active.contains_key(&id) {
                tracing::warn!(item = id, "cannot remove an active item; cancel it first");
                continue;
            }
            self.pending.retain(|p| *p != id);
            let _ = self.registry.remove(id);
        }
    }

    fn remove_completed(&mut self) -> usize {
        let done = self.registry.ids_where(|i| i.status == ItemStatus::Completed);
        let count = done.len();
        for id in done {
            let _ = self.registry.remove(id);
        }
        count
    }

    fn clear(&mut self, force: bool) {
        if self.running && !force {
            tracing::warn!("batch is running; use force to clear everything");
            return;
        }
        if force {
            self.cancel_all_active();
        }
        self.active.clear();
        self.pending.clear();
        self.registry.clear();
        self.running = false;
        self.paused = false;
    }

    fn cancel_all_active(&mut self) {
        for session in self.active.values() {
            session.cancel();
        }
    }

    // ----- outcome handling -----

    fn on_outcome(&mut self, id: ItemId, outcome: Outcome) {
        self.active.remove(&id);

        if self.registry.get(id).is_none() {
            // Removed while the attempt was winding down; just refill.
            self.admit();
            return;
        }

        let (ok, err) = match &outcome {
            Outcome::Success => (true, String::new()),
            Outcome::Canceled => (false, "canceled".to_string()),
            Outcome::Failed(e) => (false, e.clone()),
        };
        self.sink.on_outcome(id, ok, &err);

        let retry_count = self.registry.get(id).map(|i| i.retry_count).unwrap_or(0);
        match self.policy.decide(&outcome, retry_count) {
            Disposition::Finalize(Final::Completed) => {
                if let Some(item) = self.registry.get_mut(id) {
                    item.retry_count = 0;
                    item.last_error = None;
                }
                self.set_progress(id, Progress::Percent(100));
                self.set_status(id, ItemStatus::Completed);
                self.skip_group_preventives(id);
            }
            Disposition::Finalize(Final::Canceled) => {
                self.set_status(id, ItemStatus::Canceled);
                self.set_progress(id, Progress::Percent(0));
            }
            Disposition::Finalize(Final::Error) => {
                if let Some(item) = self.registry.get_mut(id) {
                    item.last_error = Some(err.clone());
                }
                self.set_status(id, ItemStatus::Error);
                self.set_progress(id, Progress::Percent(0));
                self.activate_group_preventives(id);
            }
            Disposition::Requeue { attempt } => {
                let max = self.policy.max_retries;
                if let Some(item) = self.registry.get_mut(id) {
                    item.retry_count = attempt;
                    item.last_error = Some(err.clone());
                }
                self.set_status(id, ItemStatus::Retrying { attempt, max });
                self.set_progress(id, Progress::Indeterminate);
                self.pending.push_back(id);
                tracing::info!(item = id, attempt, max, "auto-retry scheduled");
            }
        }

        self.admit();
    }

    /// A main item succeeded: its group's backup URLs are no longer needed.
    fn skip_group_preventives(&mut self, id: ItemId) {
        let Some(item) = self.registry.get(id) else {
            return;
        };
        if item.kind != ItemKind::Main {
            return;
        }
        let Some(group) = item.group else {
            return;
        };
        let targets = self.registry.ids_where(|i| {
            i.group == Some(group)
                && i.kind == ItemKind::Preventive
                && matches!(
                    i.status,
                    ItemStatus::Waiting
                        | ItemStatus::Pending
                        | ItemStatus::Queued
                        | ItemStatus::QueuedPreventive
                        | ItemStatus::Retrying { .. }
                )
        });
        for target in targets {
            self.pending.retain(|p| *p != target);
            self.set_status(target, ItemStatus::SkippedMainOk);
            self.set_progress(target, Progress::Percent(0));
        }
    }

    /// A main item failed terminally: admit its group's backup URLs.
    fn activate_group_preventives(&mut self, id: ItemId) {
        let Some(item) = self.registry.get(id) else {
            return;
        };
        if item.kind != ItemKind::Main {
            return;
        }
        let Some(group) = item.group else {
            return;
        };
        let targets = self.registry.ids_where(|i| {
            i.group == Some(group)
                && i.kind == ItemKind::Preventive
                && matches!(
                    i.status,
                    ItemStatus::Waiting | ItemStatus::Pending | ItemStatus::Error
                )
        });
        for target in targets {
            tracing::info!(item = target, "main URL failed; queueing preventive URL");
            self.set_status(target, ItemStatus::QueuedPreventive);
            self.set_progress(target, Progress::Indeterminate);
            self.pending.push_back(target);
        }
    }

    // ----- state setters -----

    /// Write a status if it changed, notifying the sink. The dedup keeps
    /// the event stream bounded by actual transitions.
    fn set_status(&mut self, id: ItemId, status: ItemStatus) {
        if let Some(item) = self.registry.get_mut(id) {
            if item.status != status {
                item.status = status.clone();
                self.sink.on_status(id, &status);
            }
        }
    }

    /// Write a progress value if it changed, notifying the sink. Guarantees
    /// no consecutive duplicate percent is ever emitted for an item.
    fn set_progress(&mut self, id: ItemId, progress: Progress) {
        if let Some(item) = self.registry.get_mut(id) {
            if item.progress != progress {
                item.progress = progress;
                self.sink.on_progress(id, progress);
            }
        }
    }
}
