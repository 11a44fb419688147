//! Format selector strings handed to the fetch engine.

use crate::registry::QualityTier;

/// Audio-only selection for sound items.
pub const AUDIO_ONLY: &str = "bestaudio/best";

/// Simplest possible selection; used by fallback steps.
pub const SIMPLE: &str = "best";

/// Flexible best-video-plus-audio selection for platforms with spotty
/// format listings (TikTok, Facebook).
pub const FLEXIBLE: &str = "bv*+ba/b";

/// Single-stream selection used when no transcoder is available to merge
/// separate video/audio streams.
pub const NO_MERGE: &str = "best[ext=mp4][height<=720]/best";

/// Build the primary format selector for a quality tier, with graceful
/// fallbacks so a missing exact resolution does not fail the attempt.
pub fn selector(quality: QualityTier) -> String {
    match quality.height() {
        None => "bestvideo+bestaudio[acodec^=mp4a]/bestvideo+bestaudio/best".to_string(),
        Some(h) => format!("bv[height<={h}]+ba/bv*[height<={h}]+ba/bestvideo+bestaudio/best"),
    }
}
