//! Declarative per-attempt option set handed to the fetch engine, and the
//! builder that derives it from an item plus the local environment.

use std::path::{Path, PathBuf};

use crate::config::VdmConfig;
use crate::platform::Platform;
use crate::registry::QualityTier;
use crate::storage;

use super::format;

/// Browser identity sent with every attempt.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// YouTube player clients when a cookie file is available: app clients
/// first, they see fewer signature challenges.
pub const YT_CLIENTS_WITH_COOKIES: (&[&str], &[&str]) = (
    &["ios", "android", "web"],
    &["web_creator", "tv", "tv_embedded", "mediaconnect"],
);

/// YouTube player clients without cookies: stay on the web client.
pub const YT_CLIENTS_NO_COOKIES: (&[&str], &[&str]) = (
    &["web", "web_embedded"],
    &["web_creator", "ios", "android", "tv", "tv_embedded", "mediaconnect"],
);

/// App-only client set used by the cookie-backed YouTube fallback step.
pub const YT_CLIENTS_APP_ONLY: (&[&str], &[&str]) = (
    &["ios", "android"],
    &["web", "web_creator", "web_embedded", "tv", "tv_embedded", "mediaconnect"],
);

/// Which engine executes the attempt. The primary engine handles every
/// platform; the alternates exist only as Instagram fallback steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchBackend {
    #[default]
    Native,
    Instaloader,
    GalleryDl,
}

/// Per-platform extractor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractorTweaks {
    /// (player_client, player_skip) lists for YouTube.
    pub youtube_clients: Option<(&'static [&'static str], &'static [&'static str])>,
    pub tiktok_webpage: bool,
    pub facebook_hd: bool,
}

/// Retry/chunking parameters for the transfer itself. These are internal to
/// one attempt; they are distinct from the scheduler's retry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTuning {
    pub retries: u32,
    pub fragment_retries: u32,
    pub concurrent_fragments: u32,
    pub chunk_size: Option<u64>,
    /// Resume partial files. Disabled by the stale-range recovery attempt.
    pub resume: bool,
}

impl Default for NetworkTuning {
    fn default() -> Self {
        Self {
            retries: 10,
            fragment_retries: 10,
            concurrent_fragments: 4,
            chunk_size: Some(10 * 1024 * 1024),
            resume: true,
        }
    }
}

/// Postprocessing requested from the engine after the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Postprocessing {
    /// Remux the result into an MP4 container.
    pub remux_mp4: bool,
    /// Extract audio to MP3 (sound items).
    pub extract_audio_mp3: bool,
    /// Re-encode video to H.264 + AAC instead of stream-copying.
    pub recode_h264: bool,
    /// Write and convert a JPEG thumbnail next to the output.
    pub thumbnails_jpg: bool,
}

/// The full declarative option set for one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub output_dir: PathBuf,
    /// Sanitized custom base filename; None lets the engine name the file
    /// from the remote title and id.
    pub filename_base: Option<String>,
    /// Write the item into its own subfolder.
    pub per_item_subfolder: bool,
    pub format: String,
    /// HTTP headers (user agent, per-platform referer).
    pub headers: Vec<(String, String)>,
    pub cookie_file: Option<PathBuf>,
    pub backend: FetchBackend,
    pub extractor: ExtractorTweaks,
    pub tuning: NetworkTuning,
    pub geo_bypass: bool,
    /// Skip platform-specific extraction entirely (Reddit fallback).
    pub force_generic: bool,
    /// Path to the transcoder binary, when one was found.
    pub transcoder: Option<PathBuf>,
    pub post: Postprocessing,
}

/// Local environment facts the option builder depends on: transcoder
/// availability and which cookie files actually exist on disk.
#[derive(Debug, Clone, Default)]
pub struct FetchEnv {
    pub transcoder: Option<PathBuf>,
    pub youtube_cookies: Option<PathBuf>,
    pub instagram_cookies: Option<PathBuf>,
}

impl FetchEnv {
    /// Probe the environment: locate a transcoder on PATH and keep only
    /// cookie files that exist.
    pub fn detect(cfg: &VdmConfig) -> Self {
        let exists = |p: &Option<PathBuf>| p.as_ref().filter(|p| p.exists()).cloned();
        Self {
            transcoder: find_transcoder(),
            youtube_cookies: exists(&cfg.youtube_cookies),
            instagram_cookies: exists(&cfg.instagram_cookies),
        }
    }

    /// Cookie file to send for a platform, if any.
    pub fn cookies_for(&self, platform: Platform) -> Option<&Path> {
        match platform {
            Platform::YouTube => self.youtube_cookies.as_deref(),
            Platform::Instagram => self.instagram_cookies.as_deref(),
            _ => None,
        }
    }
}

/// Locate `ffmpeg` on PATH. Returns None when no transcoder is installed;
/// the option builder then degrades format selection instead of failing.
pub fn find_transcoder() -> Option<PathBuf> {
    let exe = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe))
        .find(|candidate| candidate.is_file())
}

/// Build the primary option set for one item.
pub fn base_options(
    platform: Platform,
    quality: QualityTier,
    output_name: Option<&str>,
    audio_only: bool,
    output_dir: &Path,
    cfg: &VdmConfig,
    env: &FetchEnv,
) -> FetchOptions {
    let have_transcoder = env.transcoder.is_some();

    let mut fmt = format::selector(quality);
    if !have_transcoder && fmt.contains('+') && !audio_only {
        // No way to merge separate streams; fall back to a single stream.
        fmt = format::NO_MERGE.to_string();
    }
    if audio_only {
        fmt = format::AUDIO_ONLY.to_string();
    } else if matches!(platform, Platform::TikTok | Platform::Facebook) {
        fmt = format::FLEXIBLE.to_string();
    }

    let mut headers = vec![("User-Agent".to_string(), USER_AGENT.to_string())];
    if let Some(referer) = platform.referer() {
        headers.push(("Referer".to_string(), referer.to_string()));
    }

    let extractor = ExtractorTweaks {
        youtube_clients: (platform == Platform::YouTube).then(|| {
            if env.youtube_cookies.is_some() {
                YT_CLIENTS_WITH_COOKIES
            } else {
                YT_CLIENTS_NO_COOKIES
            }
        }),
        tiktok_webpage: platform == Platform::TikTok,
        facebook_hd: platform == Platform::Facebook,
    };

    let post = if have_transcoder {
        Postprocessing {
            remux_mp4: !audio_only,
            extract_audio_mp3: audio_only,
            recode_h264: cfg.force_h264 && !audio_only,
            thumbnails_jpg: cfg.per_item_subfolder && !audio_only,
        }
    } else {
        Postprocessing::default()
    };

    FetchOptions {
        output_dir: output_dir.to_path_buf(),
        filename_base: output_name.map(storage::sanitize_filename),
        per_item_subfolder: cfg.per_item_subfolder,
        format: fmt,
        headers,
        cookie_file: env.cookies_for(platform).map(Path::to_path_buf),
        backend: FetchBackend::Native,
        extractor,
        tuning: NetworkTuning::default(),
        geo_bypass: true,
        force_generic: false,
        transcoder: env.transcoder.clone(),
        post,
    }
}
