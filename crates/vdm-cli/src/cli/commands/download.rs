//! `vdm download` – run a batch of URLs to completion.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use vdm_core::batch::Batch;
use vdm_core::config::VdmConfig;
use vdm_core::events::EventSink;
use vdm_core::fetch::{Fetcher, PassthroughExpander, TitleResolver, UrlExpander};
use vdm_core::platform;
use vdm_core::registry::{ItemKind, ItemStatus, QualityTier};
use vdm_core::scheduler::WORKER_CEILING;

use crate::sink::ConsoleSink;
use crate::ytdlp::YtDlpFetcher;

pub struct DownloadArgs {
    pub urls: Vec<String>,
    pub from_file: Option<PathBuf>,
    pub quality: Option<QualityTier>,
    pub jobs: Option<usize>,
    pub max_retries: Option<u32>,
    pub audio_only: bool,
    pub no_expand: bool,
    pub output_dir: Option<PathBuf>,
}

pub async fn run_download(mut cfg: VdmConfig, args: DownloadArgs) -> Result<()> {
    let mut urls = args.urls;
    if let Some(path) = &args.from_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading URL list from {}", path.display()))?;
        urls.extend(platform::split_urls(&text));
    }
    urls.retain(|url| {
        let ok = platform::is_supported_url(url);
        if !ok {
            eprintln!("skipping unsupported URL: {url}");
        }
        ok
    });
    if urls.is_empty() {
        bail!("no URLs to download");
    }

    if let Some(quality) = args.quality {
        cfg.quality = quality;
    }
    if let Some(jobs) = args.jobs {
        cfg.max_workers = jobs;
    }
    if let Some(max) = args.max_retries {
        cfg.max_retries = max;
    }
    if let Some(dir) = args.output_dir {
        cfg.output_dir = Some(dir);
    } else if cfg.output_dir.is_none() {
        cfg.output_dir = Some(std::env::current_dir()?);
    }

    let fetcher = Arc::new(YtDlpFetcher::discover()?);
    let sink = Arc::new(ConsoleSink::new());
    let fetcher_dyn: Arc<dyn Fetcher> = Arc::clone(&fetcher) as Arc<dyn Fetcher>;
    let sink_dyn: Arc<dyn EventSink> = Arc::clone(&sink) as Arc<dyn EventSink>;
    let batch = Batch::spawn(cfg.clone(), fetcher_dyn, sink_dyn);

    let kind = if args.audio_only {
        ItemKind::Sound
    } else {
        ItemKind::Main
    };
    let passthrough = PassthroughExpander;
    let expander: &dyn UrlExpander = if args.no_expand {
        &passthrough
    } else {
        fetcher.as_ref()
    };
    let titles: &dyn TitleResolver = fetcher.as_ref();
    let added = batch
        .add_urls(&urls, cfg.quality, kind, expander, Some(titles))
        .await?;
    if added.is_empty() {
        bail!("nothing to download (all URLs were duplicates)");
    }

    println!(
        "downloading {} item(s) with up to {} worker(s) into {}",
        added.len(),
        cfg.max_workers.clamp(1, WORKER_CEILING),
        cfg.output_dir.as_deref().unwrap_or(std::path::Path::new(".")).display(),
    );
    batch.start_all().await?;
    sink.wait_done().await;

    let stats = batch.stats().await?;
    println!(
        "done: {} total, {} completed, {} failed",
        stats.total, stats.completed, stats.failed
    );
    for item in batch.snapshot().await? {
        if item.status == ItemStatus::Error {
            println!(
                "  failed: {} ({})",
                item.url,
                item.last_error.unwrap_or_default()
            );
        }
    }

    batch.shutdown().await.ok();
    Ok(())
}
