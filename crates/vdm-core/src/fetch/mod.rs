//! Boundary to the external fetch/transcode engine.
//!
//! The engine itself lives outside this crate (the CLI ships a `yt-dlp`
//! subprocess adapter); the core only speaks these traits. An attempt is a
//! single blocking call that reports raw byte progress through a callback
//! and honors the injected `AttemptSession` checkpoint for pause/cancel.

pub mod format;
pub mod options;

pub use options::{FetchBackend, FetchEnv, FetchOptions};

use thiserror::Error;

use crate::session::{AttemptAborted, AttemptSession};

/// Raw progress signal from the fetch engine, prior to normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSignal {
    /// Bytes are flowing; `total` is absent when the size is unknown.
    Downloading { downloaded: u64, total: Option<u64> },
    /// Transfer done; merge/postprocessing begins.
    Finished,
}

/// Failure of one fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The session checkpoint aborted the attempt; distinguished from
    /// ordinary fetch failure so cancellation bypasses all retry logic.
    #[error("attempt canceled by user")]
    Canceled,
    #[error("{0}")]
    Failed(String),
}

impl From<AttemptAborted> for FetchError {
    fn from(_: AttemptAborted) -> Self {
        FetchError::Canceled
    }
}

impl FetchError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchError::Canceled)
    }
}

/// Best-effort metadata returned by a probe.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    /// Remote media identifier; used to locate stale partial artifacts.
    pub id: Option<String>,
    pub title: Option<String>,
}

/// One-attempt fetch engine.
///
/// Implementations must call `session.checkpoint()` from every progress
/// callback and map its abort into `FetchError::Canceled`, and must not
/// panic across this boundary.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch remote metadata without downloading. Failures are non-fatal to
    /// the caller; return what is known.
    fn probe(&self, url: &str, options: &FetchOptions) -> Result<MediaProbe, FetchError>;

    /// Run one blocking download attempt to completion.
    fn attempt(
        &self,
        url: &str,
        options: &FetchOptions,
        session: &AttemptSession,
        on_signal: &mut dyn FnMut(FetchSignal),
    ) -> Result<(), FetchError>;
}

/// Expands a playlist/channel URL into concrete video URLs; pass-through for
/// anything else.
pub trait UrlExpander: Send + Sync {
    fn expand(&self, url: &str) -> Vec<String>;
}

/// Expander that never explodes anything.
#[derive(Debug, Default)]
pub struct PassthroughExpander;

impl UrlExpander for PassthroughExpander {
    fn expand(&self, url: &str) -> Vec<String> {
        vec![url.to_string()]
    }
}

/// Best-effort title lookup used only to prefill a display name.
pub trait TitleResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Option<String>;
}
