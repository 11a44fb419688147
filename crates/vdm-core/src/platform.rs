//! Source platform detection and URL normalization.
//!
//! Classifies a media URL by host, strips timestamp junk from YouTube watch
//! links, and canonicalizes playlist/channel URLs so the expander sees a
//! stable shape. Only YouTube URLs are ever treated as expandable collections.

use url::Url;

/// Source platform of a media URL, detected from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Facebook,
    Dailymotion,
    Reddit,
    Telegram,
    Other,
}

impl Platform {
    /// Detect the platform from a URL. Unknown hosts and unparseable URLs map to `Other`.
    pub fn detect(url: &str) -> Platform {
        let Ok(parsed) = Url::parse(url) else {
            return Platform::Other;
        };
        let Some(host) = parsed.host_str() else {
            return Platform::Other;
        };
        let host = host.to_ascii_lowercase();

        let matches_any = |domains: &[&str]| {
            domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        };

        if matches_any(&["youtube.com", "youtu.be"]) {
            Platform::YouTube
        } else if matches_any(&["tiktok.com"]) {
            Platform::TikTok
        } else if matches_any(&["instagram.com"]) {
            Platform::Instagram
        } else if matches_any(&["facebook.com", "fb.watch"]) {
            Platform::Facebook
        } else if matches_any(&["dailymotion.com", "dai.ly"]) {
            Platform::Dailymotion
        } else if matches_any(&["reddit.com", "redd.it", "v.redd.it"]) {
            Platform::Reddit
        } else if matches_any(&["t.me", "telegram.org"]) {
            Platform::Telegram
        } else {
            Platform::Other
        }
    }

    /// Referer header value sent with fetch attempts, where the platform wants one.
    pub fn referer(self) -> Option<&'static str> {
        match self {
            Platform::Instagram => Some("https://www.instagram.com/"),
            Platform::Facebook => Some("https://www.facebook.com/"),
            Platform::TikTok => Some("https://www.tiktok.com/"),
            Platform::Dailymotion => Some("https://www.dailymotion.com/"),
            Platform::Reddit => Some("https://www.reddit.com/"),
            Platform::Telegram => Some("https://t.me/"),
            Platform::YouTube | Platform::Other => None,
        }
    }
}

/// Hosts the download manager accepts when adding URLs.
const SUPPORTED_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "instagram.com",
    "facebook.com",
    "fb.watch",
    "tiktok.com",
    "x.com",
    "twitter.com",
    "dailymotion.com",
    "dai.ly",
    "reddit.com",
    "v.redd.it",
    "redd.it",
    "t.me",
    "telegram.org",
];

/// True if the URL points at a host we accept for download items.
pub fn is_supported_url(url: &str) -> bool {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    SUPPORTED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Query parameters stripped from YouTube watch URLs (timestamps, share tokens).
const STRIP_PARAMS: &[&str] = &["t", "start", "time_continue", "si"];

/// Strip timestamp/share parameters from a YouTube watch URL and normalize
/// `youtu.be/<id>` short links to the canonical `/watch?v=<id>` form.
/// Non-YouTube URLs come back unchanged.
pub fn sanitize_watch_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return url.to_string();
    };

    let keep: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !STRIP_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if host == "youtu.be" {
        let video_id = parsed
            .path_segments()
            .and_then(|mut segs| segs.next())
            .unwrap_or("")
            .to_string();
        if video_id.is_empty() {
            return url.to_string();
        }
        let mut out = Url::parse("https://www.youtube.com/watch").expect("static URL parses");
        {
            let mut q = out.query_pairs_mut();
            q.append_pair("v", &video_id);
            for (k, v) in keep.iter().filter(|(k, _)| k != "v") {
                q.append_pair(k, v);
            }
        }
        return out.to_string();
    }

    if (host == "youtube.com" || host.ends_with(".youtube.com")) && parsed.path() == "/watch" {
        let mut out = parsed.clone();
        out.set_query(None);
        if !keep.is_empty() {
            let mut q = out.query_pairs_mut();
            for (k, v) in &keep {
                q.append_pair(k, v);
            }
        }
        return out.to_string();
    }

    url.to_string()
}

/// True if the URL looks like a YouTube playlist or channel (something the
/// expander can explode into concrete video URLs). Other platforms never
/// count as collections.
pub fn is_collection(url: &str) -> bool {
    if Platform::detect(url) != Platform::YouTube {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    if lower.contains("list=") || lower.contains("/playlist") {
        return true;
    }
    if lower.contains("/watch") {
        return false;
    }
    lower.contains("/channel/") || lower.contains("/user/") || lower.contains("/c/") || lower.contains("/@")
}

/// Canonicalize a YouTube playlist URL to `https://www.youtube.com/playlist?list=<id>`.
/// Non-playlist and non-YouTube URLs come back unchanged.
pub fn canonicalize_playlist_url(url: &str) -> String {
    if Platform::detect(url) != Platform::YouTube {
        return url.to_string();
    }
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let list = parsed
        .query_pairs()
        .find(|(k, _)| k == "list")
        .map(|(_, v)| v.into_owned());
    match list {
        Some(id) if !id.is_empty() => format!("https://www.youtube.com/playlist?list={id}"),
        _ => url.to_string(),
    }
}

/// Point a YouTube channel/user/handle URL at its `/videos` tab. Watch URLs
/// and non-YouTube URLs come back unchanged.
pub fn canonicalize_channel_url(url: &str) -> String {
    if Platform::detect(url) != Platform::YouTube {
        return url.to_string();
    }
    let lower = url.to_ascii_lowercase();
    if lower.contains("/watch") {
        return url.to_string();
    }
    if lower.contains("/channel/") || lower.contains("/user/") || lower.contains("/c/") || lower.contains("/@")
    {
        return format!("{}/videos", url.trim_end_matches('/'));
    }
    url.to_string()
}

/// Split free-form text into the http(s) URLs it contains, in order.
pub fn split_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|part| part.starts_with("http://") || part.starts_with("https://"))
        .map(str::to_string)
        .collect()
}
