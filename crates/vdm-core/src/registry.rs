//! In-memory item registry: per-item identity, metadata, status and progress.
//!
//! Pure state container. All mutation happens from the scheduler actor; the
//! registry itself has no locking and no side effects beyond its own maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Item identifier. Assigned at creation, never reused while the item exists.
pub type ItemId = u64;

/// Correlates main/preventive/sound items that represent the same logical content.
pub type GroupId = u64;

/// Requested quality tier. Immutable after item creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "best")]
    Best,
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl QualityTier {
    /// Height cap for the format selector; None for `Best`.
    pub fn height(self) -> Option<u32> {
        match self {
            QualityTier::Best => None,
            QualityTier::P1080 => Some(1080),
            QualityTier::P720 => Some(720),
            QualityTier::P480 => Some(480),
            QualityTier::P360 => Some(360),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityTier::Best => "best",
            QualityTier::P1080 => "1080p",
            QualityTier::P720 => "720p",
            QualityTier::P480 => "480p",
            QualityTier::P360 => "360p",
        };
        f.write_str(s)
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(QualityTier::Best),
            "1080p" | "1080" => Ok(QualityTier::P1080),
            "720p" | "720" => Ok(QualityTier::P720),
            "480p" | "480" => Ok(QualityTier::P480),
            "360p" | "360" => Ok(QualityTier::P360),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// Role of an item within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Primary URL for the content.
    Main,
    /// Backup URL, admitted only after the group's main item fails terminally.
    Preventive,
    /// Audio-only variant of the content.
    Sound,
}

/// Reported per-item progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Total size unknown.
    Indeterminate,
    /// Percent complete, 0..=100.
    Percent(u8),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Indeterminate => f.write_str("--"),
            Progress::Percent(p) => write!(f, "{p}%"),
        }
    }
}

/// Per-item lifecycle state.
///
/// `Queued`, `QueuedPreventive` and `Retrying` mean the item sits in the
/// pending queue; `Starting` through `Merging` mean an attempt is active;
/// the rest are terminal or dormant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Queued,
    QueuedPreventive,
    /// Preventive item parked until its group's main item resolves.
    Waiting,
    Starting,
    Downloading,
    Paused,
    Merging,
    Completed,
    Error,
    Canceled,
    /// Excluded from the batch because it was not selected.
    SkippedUnselected,
    /// Preventive item dropped because the group's main item succeeded.
    SkippedMainOk,
    /// Re-enqueued after a failed outcome cycle; `attempt` of `max` consumed.
    Retrying { attempt: u32, max: u32 },
}

impl ItemStatus {
    /// Item is done: no attempt will be scheduled without user action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed
                | ItemStatus::Error
                | ItemStatus::Canceled
                | ItemStatus::SkippedUnselected
                | ItemStatus::SkippedMainOk
        )
    }

    /// Item currently has an attempt executor.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ItemStatus::Starting | ItemStatus::Downloading | ItemStatus::Paused | ItemStatus::Merging
        )
    }

    /// Item is a member of the pending queue.
    pub fn in_pending_queue(&self) -> bool {
        matches!(
            self,
            ItemStatus::Queued | ItemStatus::QueuedPreventive | ItemStatus::Retrying { .. }
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => f.write_str("Pending"),
            ItemStatus::Queued => f.write_str("Queued"),
            ItemStatus::QueuedPreventive => f.write_str("Queued (preventive)"),
            ItemStatus::Waiting => f.write_str("Waiting (preventive)"),
            ItemStatus::Starting => f.write_str("Starting"),
            ItemStatus::Downloading => f.write_str("Downloading"),
            ItemStatus::Paused => f.write_str("Paused"),
            ItemStatus::Merging => f.write_str("Merging"),
            ItemStatus::Completed => f.write_str("Completed"),
            ItemStatus::Error => f.write_str("Error"),
            ItemStatus::Canceled => f.write_str("Canceled"),
            ItemStatus::SkippedUnselected => f.write_str("Skipped (unchecked)"),
            ItemStatus::SkippedMainOk => f.write_str("Skipped (main OK)"),
            ItemStatus::Retrying { attempt, max } => write!(f, "Retry {attempt}/{max}"),
        }
    }
}

/// Creation parameters for a new item.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub url: String,
    pub quality: QualityTier,
    /// Custom base filename; None lets the fetcher derive one from the remote title/id.
    pub output_name: Option<String>,
    pub kind: ItemKind,
    pub group: Option<GroupId>,
    /// Item produced by expanding a playlist/channel.
    pub from_expansion: bool,
}

impl ItemSpec {
    pub fn new(url: impl Into<String>, quality: QualityTier) -> Self {
        Self {
            url: url.into(),
            quality,
            output_name: None,
            kind: ItemKind::Main,
            group: None,
            from_expansion: false,
        }
    }
}

/// One download task.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub url: String,
    pub quality: QualityTier,
    pub output_name: Option<String>,
    pub kind: ItemKind,
    pub group: Option<GroupId>,
    /// Participates in the next start-all invocation.
    pub selected: bool,
    pub status: ItemStatus,
    pub progress: Progress,
    /// Automatic retries consumed; bounded by the configured maximum.
    pub retry_count: u32,
    pub from_expansion: bool,
    /// Last raw error string, retained for display after a terminal `Error`.
    pub last_error: Option<String>,
}

/// Aggregate counts recomputed from item statuses alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: usize,
}

/// Error returned when an operation names an item the registry does not hold.
#[derive(Debug, PartialEq, Eq)]
pub struct NotFound(pub ItemId);

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} not found", self.0)
    }
}

impl std::error::Error for NotFound {}

/// Registry of all items, keyed by id, iterated in id order.
#[derive(Debug, Default)]
pub struct Registry {
    items: BTreeMap<ItemId, Item>,
    next_id: ItemId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new item in status `Pending`, returning its id.
    pub fn create(&mut self, spec: ItemSpec) -> ItemId {
        self.next_id += 1;
        let id = self.next_id;
        self.items.insert(
            id,
            Item {
                id,
                url: spec.url,
                quality: spec.quality,
                output_name: spec.output_name,
                kind: spec.kind,
                group: spec.group,
                selected: true,
                status: ItemStatus::Pending,
                progress: Progress::Indeterminate,
                retry_count: 0,
                from_expansion: spec.from_expansion,
                last_error: None,
            },
        );
        id
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    /// Remove an item. The caller must ensure no attempt is active for it.
    pub fn remove(&mut self, id: ItemId) -> Result<Item, NotFound> {
        self.items.remove(&id).ok_or(NotFound(id))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Ids of all items matching a predicate, in id order. Used by bulk
    /// operations (retry-failed, delete-successful, start-all).
    pub fn ids_where(&self, pred: impl Fn(&Item) -> bool) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|item| pred(item))
            .map(|item| item.id)
            .collect()
    }

    /// True if any item already carries this URL (used to dedupe bulk adds).
    pub fn contains_url(&self, url: &str) -> bool {
        self.items.values().any(|item| item.url == url)
    }

    /// Recompute aggregate counts from statuses. Never maintained as counters.
    pub fn stats(&self) -> BatchStats {
        let mut stats = BatchStats {
            total: self.items.len(),
            ..BatchStats::default()
        };
        for item in self.items.values() {
            match item.status {
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Error => stats.failed += 1,
                _ => {}
            }
            if item.status.is_active() {
                stats.active += 1;
            }
        }
        stats
    }
}
