//! `vdm expand` – print the concrete video URLs of a playlist/channel.

use anyhow::{bail, Result};
use vdm_core::fetch::UrlExpander;
use vdm_core::platform;

use crate::ytdlp::YtDlpFetcher;

pub fn run_expand(url: &str) -> Result<()> {
    if !platform::is_collection(url) {
        bail!("not a playlist or channel URL: {url}");
    }
    let lower = url.to_ascii_lowercase();
    let canonical = if lower.contains("list=") || lower.contains("/playlist") {
        platform::canonicalize_playlist_url(url)
    } else {
        platform::canonicalize_channel_url(url)
    };

    let fetcher = YtDlpFetcher::discover()?;
    let videos = fetcher.expand(&canonical);
    for video in &videos {
        println!("{video}");
    }
    tracing::info!(count = videos.len(), "expanded {canonical}");
    Ok(())
}
