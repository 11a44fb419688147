//! Advisory classification of raw fetch errors.
//!
//! Pattern matching over error strings is inherently best-effort, so the
//! hint produced here is only ever logged; it must not influence the retry
//! decision. The stale-range predicate is the one exception kept separate:
//! it gates the purge-and-retry recovery step.

/// Human-readable diagnosis of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    LoginRequired,
    RateLimited,
    MembersOnly,
    SignatureChallenge,
    Forbidden,
    FormatUnavailable,
    TranscoderMissing,
    Impersonation,
}

impl Hint {
    /// Suggested remedy, rendered into the per-item log stream.
    pub fn advice(self) -> &'static str {
        match self {
            Hint::LoginRequired => "login required: import a cookie file for this platform",
            Hint::RateLimited => "rate limited: wait a few minutes or refresh cookies",
            Hint::MembersOnly => "members-only content: import cookies from a member account",
            Hint::SignatureChallenge => {
                "player signature challenge: import cookies or update the fetch engine"
            }
            Hint::Forbidden => "access forbidden: import cookies or update the fetch engine",
            Hint::FormatUnavailable => "requested format unavailable: try a lower quality tier",
            Hint::TranscoderMissing => "ffmpeg not found: install it and add it to PATH",
            Hint::Impersonation => "site requires client impersonation: update the fetch engine",
        }
    }
}

/// Best-effort diagnosis from a raw error string. Returns the first match
/// in priority order, or None when nothing is recognized.
pub fn advisory_hint(error: &str) -> Option<Hint> {
    let msg = error.to_ascii_lowercase();

    if msg.contains("members-only") || msg.contains("members only") || msg.contains("error 153") {
        return Some(Hint::MembersOnly);
    }
    if msg.contains("nsig extraction failed")
        || msg.contains("sabr streaming")
        || msg.contains("n challenge")
        || msg.contains("po token")
    {
        return Some(Hint::SignatureChallenge);
    }
    if msg.contains("login required")
        || msg.contains("login_required")
        || msg.contains("checkpoint_required")
    {
        return Some(Hint::LoginRequired);
    }
    if msg.contains("429") || msg.contains("rate-limit") || msg.contains("rate limit") {
        return Some(Hint::RateLimited);
    }
    if msg.contains("403") && msg.contains("forbidden") {
        return Some(Hint::Forbidden);
    }
    if msg.contains("only images are available")
        || msg.contains("format is not available")
        || msg.contains("requested format is not available")
    {
        return Some(Hint::FormatUnavailable);
    }
    if (msg.contains("ffmpeg") || msg.contains("ffprobe"))
        && (msg.contains("not found") || msg.contains("could not be found"))
    {
        return Some(Hint::TranscoderMissing);
    }
    if msg.contains("impersonat") {
        return Some(Hint::Impersonation);
    }

    None
}

/// True when the error is the range-not-satisfiable conflict produced by
/// resuming against a rotated remote stream.
pub fn stale_range_conflict(error: &str) -> bool {
    let msg = error.to_ascii_lowercase();
    msg.contains("requested range not satisfiable") || msg.contains("http error 416")
}
