//! Outward-facing batch controller: a cloneable handle over the scheduler
//! actor. All operations are messages; nothing here touches scheduler state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};

use crate::config::VdmConfig;
use crate::events::EventSink;
use crate::fetch::{Fetcher, TitleResolver, UrlExpander};
use crate::import;
use crate::platform;
use crate::registry::{BatchStats, GroupId, Item, ItemId, ItemKind, ItemSpec, QualityTier};
use crate::scheduler::{Command, Scheduler};

const COMMAND_BUFFER: usize = 64;

#[derive(Clone)]
pub struct Batch {
    inner: Arc<Inner>,
}

struct Inner {
    commands: mpsc::Sender<Command>,
    next_group: AtomicU64,
}

impl Batch {
    /// Spawn the scheduler actor and return a handle to it. Must be called
    /// from within a tokio runtime.
    pub fn spawn(cfg: VdmConfig, fetcher: Arc<dyn Fetcher>, sink: Arc<dyn EventSink>) -> Batch {
        let output_dir = cfg
            .output_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(cfg, output_dir, fetcher, sink, events_tx);
        tokio::spawn(scheduler.run(cmd_rx, events_rx));
        Batch {
            inner: Arc::new(Inner {
                commands: cmd_tx,
                next_group: AtomicU64::new(1),
            }),
        }
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.inner
            .commands
            .send(cmd)
            .await
            .map_err(|_| anyhow!("scheduler task has stopped"))
    }

    // ----- item creation -----

    pub async fn add_items(&self, specs: Vec<ItemSpec>) -> Result<Vec<ItemId>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddItems { specs, reply }).await?;
        rx.await.map_err(|_| anyhow!("scheduler dropped the reply"))
    }

    /// Bulk add plain URLs: watch URLs are sanitized, collections expanded
    /// through the expander (marking the results as expansion products),
    /// and single URLs get a best-effort display title.
    pub async fn add_urls(
        &self,
        urls: &[String],
        quality: QualityTier,
        kind: ItemKind,
        expander: &dyn UrlExpander,
        titles: Option<&dyn TitleResolver>,
    ) -> Result<Vec<ItemId>> {
        let mut specs = Vec::new();
        for raw in urls {
            let url = platform::sanitize_watch_url(raw);
            if platform::is_collection(&url) {
                let lower = url.to_ascii_lowercase();
                let canonical = if lower.contains("list=") || lower.contains("/playlist") {
                    platform::canonicalize_playlist_url(&url)
                } else {
                    platform::canonicalize_channel_url(&url)
                };
                for video in expander.expand(&canonical) {
                    let mut spec = ItemSpec::new(video, quality);
                    spec.kind = kind;
                    spec.from_expansion = true;
                    specs.push(spec);
                }
            } else {
                let mut spec = ItemSpec::new(url.clone(), quality);
                spec.kind = kind;
                if let Some(titles) = titles {
                    spec.output_name = titles.resolve(&url);
                }
                specs.push(spec);
            }
        }
        self.add_items(specs).await
    }

    /// Add one grouped text cell: primary URLs plus backup-link and
    /// original-sound sections, correlated under a fresh group id.
    pub async fn add_grouped(&self, text: &str, quality: QualityTier) -> Result<Vec<ItemId>> {
        let grouped = import::parse_grouped(text);
        if grouped.is_empty() {
            return Ok(Vec::new());
        }
        let group: GroupId = self.inner.next_group.fetch_add(1, Ordering::Relaxed);
        let mut specs = Vec::new();
        for (urls, kind) in [
            (grouped.main, ItemKind::Main),
            (grouped.preventive, ItemKind::Preventive),
            (grouped.sound, ItemKind::Sound),
        ] {
            for url in urls {
                let mut spec = ItemSpec::new(platform::sanitize_watch_url(&url), quality);
                spec.kind = kind;
                spec.group = Some(group);
                specs.push(spec);
            }
        }
        self.add_items(specs).await
    }

    // ----- batch operations -----

    pub async fn start_all(&self) -> Result<()> {
        self.send(Command::StartAll).await
    }

    pub async fn pause_all(&self) -> Result<()> {
        self.send(Command::PauseAll).await
    }

    pub async fn resume_all(&self) -> Result<()> {
        self.send(Command::ResumeAll).await
    }

    pub async fn stop_selected(&self, ids: Vec<ItemId>) -> Result<()> {
        self.send(Command::StopSelected { ids }).await
    }

    pub async fn stop_all(&self) -> Result<()> {
        self.send(Command::StopAll).await
    }

    pub async fn retry_failed(&self) -> Result<()> {
        self.send(Command::RetryFailed).await
    }

    pub async fn remove_items(&self, ids: Vec<ItemId>) -> Result<()> {
        self.send(Command::RemoveItems { ids }).await
    }

    /// Remove every completed item; returns how many were removed.
    pub async fn remove_completed(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RemoveCompleted { reply }).await?;
        rx.await.map_err(|_| anyhow!("scheduler dropped the reply"))
    }

    pub async fn clear(&self, force: bool) -> Result<()> {
        self.send(Command::Clear { force }).await
    }

    pub async fn set_selected(&self, ids: Vec<ItemId>, selected: bool) -> Result<()> {
        self.send(Command::SetSelected { ids, selected }).await
    }

    pub async fn set_concurrency(&self, workers: usize) -> Result<()> {
        self.send(Command::SetConcurrency { workers }).await
    }

    pub async fn set_max_retries(&self, max: u32) -> Result<()> {
        self.send(Command::SetMaxRetries { max }).await
    }

    // ----- views -----

    pub async fn snapshot(&self) -> Result<Vec<Item>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| anyhow!("scheduler dropped the reply"))
    }

    pub async fn stats(&self) -> Result<BatchStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| anyhow!("scheduler dropped the reply"))
    }

    /// Stop the actor, cancelling every active attempt.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}
