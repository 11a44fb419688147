//! CLI for the VDM batch download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vdm_core::config;
use vdm_core::registry::QualityTier;

use commands::{run_config, run_download, run_expand, DownloadArgs};

/// Top-level CLI for the VDM download manager.
#[derive(Debug, Parser)]
#[command(name = "vdm")]
#[command(about = "VDM: concurrent batch media download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a batch of media URLs.
    Download {
        /// Media URLs (videos, playlists, channels).
        urls: Vec<String>,

        /// Read additional URLs from a text file (whitespace separated).
        #[arg(long, value_name = "PATH")]
        from_file: Option<PathBuf>,

        /// Quality tier: best, 1080p, 720p, 480p or 360p.
        #[arg(long)]
        quality: Option<QualityTier>,

        /// Run up to N downloads concurrently (capped at 20).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Maximum automatic retries per item.
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,

        /// Download audio only (MP3).
        #[arg(long)]
        audio_only: bool,

        /// Do not expand playlists/channels into their videos.
        #[arg(long)]
        no_expand: bool,

        /// Output directory (default: config value, then the working directory).
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Expand a playlist/channel URL into its concrete video URLs.
    Expand {
        /// Playlist or channel URL.
        url: String,
    },

    /// Show the effective configuration and where it lives.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Download {
                urls,
                from_file,
                quality,
                jobs,
                max_retries,
                audio_only,
                no_expand,
                output_dir,
            } => {
                run_download(
                    cfg,
                    DownloadArgs {
                        urls,
                        from_file,
                        quality,
                        jobs,
                        max_retries,
                        audio_only,
                        no_expand,
                        output_dir,
                    },
                )
                .await?;
            }
            CliCommand::Expand { url } => run_expand(&url)?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}
