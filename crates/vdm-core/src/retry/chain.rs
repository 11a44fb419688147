//! Per-platform fallback chains: ordered option deltas tried after the
//! primary attempt fails. The order is data, not control flow, so each chain
//! is inspectable and testable in isolation.

use crate::fetch::format;
use crate::fetch::options::{ExtractorTweaks, FetchBackend, FetchOptions, YT_CLIENTS_APP_ONLY};
use crate::platform::Platform;

/// Declarative patch over the base `FetchOptions` for one fallback attempt.
#[derive(Debug, Clone, Default)]
pub struct OptionDelta {
    pub format: Option<&'static str>,
    /// Reset every extractor tweak to defaults.
    pub drop_extractor_tweaks: bool,
    /// Drop only the Facebook HD request.
    pub drop_facebook_hd: bool,
    /// Replace the YouTube player client set.
    pub youtube_clients: Option<(&'static [&'static str], &'static [&'static str])>,
    /// Set or replace the Referer header.
    pub referer: Option<&'static str>,
    pub force_generic: bool,
    /// Switch to an alternate fetch engine.
    pub backend: Option<FetchBackend>,
    pub recode_h264: bool,
    pub drop_thumbnails: bool,
}

impl OptionDelta {
    /// Apply this delta on top of a base option set.
    pub fn apply(&self, base: &FetchOptions) -> FetchOptions {
        let mut opts = base.clone();
        if let Some(fmt) = self.format {
            opts.format = fmt.to_string();
        }
        if self.drop_extractor_tweaks {
            opts.extractor = ExtractorTweaks::default();
        }
        if self.drop_facebook_hd {
            opts.extractor.facebook_hd = false;
        }
        if let Some(clients) = self.youtube_clients {
            opts.extractor.youtube_clients = Some(clients);
        }
        if let Some(referer) = self.referer {
            opts.headers.retain(|(k, _)| k != "Referer");
            opts.headers.push(("Referer".to_string(), referer.to_string()));
        }
        if self.force_generic {
            opts.force_generic = true;
        }
        if let Some(backend) = self.backend {
            opts.backend = backend;
        }
        if self.recode_h264 {
            opts.post.recode_h264 = true;
        }
        if self.drop_thumbnails {
            opts.post.thumbnails_jpg = false;
        }
        opts
    }
}

/// One fallback attempt: a label for the log stream plus the option patch.
#[derive(Debug, Clone)]
pub struct FallbackStep {
    pub label: &'static str,
    pub delta: OptionDelta,
}

impl FallbackStep {
    fn new(label: &'static str, delta: OptionDelta) -> Self {
        Self { label, delta }
    }
}

/// Ordered fallback chain for a platform. Every chain ends with the forced
/// H.264/AAC re-encode; each step is attempted at most once per cycle.
pub fn fallback_chain(platform: Platform, has_cookies: bool) -> Vec<FallbackStep> {
    let mut chain = Vec::new();

    match platform {
        Platform::TikTok => {
            chain.push(FallbackStep::new(
                "tiktok-simple",
                OptionDelta {
                    format: Some(format::SIMPLE),
                    drop_extractor_tweaks: true,
                    ..OptionDelta::default()
                },
            ));
        }
        Platform::Facebook => {
            chain.push(FallbackStep::new(
                "facebook-simple",
                OptionDelta {
                    format: Some(format::SIMPLE),
                    drop_facebook_hd: true,
                    ..OptionDelta::default()
                },
            ));
        }
        Platform::Reddit => {
            chain.push(FallbackStep::new(
                "reddit-generic",
                OptionDelta {
                    format: Some("bv*+ba/best"),
                    referer: Some("https://www.reddit.com/"),
                    force_generic: true,
                    ..OptionDelta::default()
                },
            ));
        }
        Platform::Instagram => {
            chain.push(FallbackStep::new(
                "instagram-instaloader",
                OptionDelta {
                    backend: Some(FetchBackend::Instaloader),
                    ..OptionDelta::default()
                },
            ));
            chain.push(FallbackStep::new(
                "instagram-gallery-dl",
                OptionDelta {
                    backend: Some(FetchBackend::GalleryDl),
                    ..OptionDelta::default()
                },
            ));
        }
        Platform::YouTube => {
            if has_cookies {
                chain.push(FallbackStep::new(
                    "youtube-app-client",
                    OptionDelta {
                        format: Some(format::SIMPLE),
                        youtube_clients: Some(YT_CLIENTS_APP_ONLY),
                        ..OptionDelta::default()
                    },
                ));
            }
            chain.push(FallbackStep::new(
                "youtube-simple",
                OptionDelta {
                    format: Some(format::SIMPLE),
                    ..OptionDelta::default()
                },
            ));
        }
        Platform::Dailymotion | Platform::Telegram | Platform::Other => {}
    }

    chain.push(FallbackStep::new(
        "recode-h264",
        OptionDelta {
            recode_h264: true,
            drop_thumbnails: true,
            ..OptionDelta::default()
        },
    ));

    chain
}

/// Options for the one-shot recovery attempt after a stale-range conflict:
/// resume and chunking off so the transfer starts from byte zero.
pub fn range_recovery(base: &FetchOptions) -> FetchOptions {
    let mut opts = base.clone();
    opts.tuning.resume = false;
    opts.tuning.chunk_size = None;
    opts.tuning.concurrent_fragments = 1;
    opts
}
