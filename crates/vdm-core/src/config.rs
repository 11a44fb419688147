use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::registry::QualityTier;

/// Global configuration loaded from `~/.config/vdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdmConfig {
    /// Maximum number of concurrent download workers (clamped to 20 at runtime).
    pub max_workers: usize,
    /// Maximum automatic re-enqueues per item after its fallback chain is exhausted.
    pub max_retries: u32,
    /// Default quality tier for new items.
    #[serde(default)]
    pub quality: QualityTier,
    /// Output directory; None = resolved by the caller (CLI uses the working directory).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Write each item into its own subfolder together with a JPEG thumbnail.
    #[serde(default)]
    pub per_item_subfolder: bool,
    /// Always re-encode video to H.264/AAC instead of stream-copying.
    #[serde(default)]
    pub force_h264: bool,
    /// Netscape cookie file used for YouTube attempts, if present on disk.
    #[serde(default)]
    pub youtube_cookies: Option<PathBuf>,
    /// Netscape cookie file used for Instagram attempts, if present on disk.
    #[serde(default)]
    pub instagram_cookies: Option<PathBuf>,
}

impl Default for VdmConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_retries: 3,
            quality: QualityTier::default(),
            output_dir: None,
            per_item_subfolder: false,
            force_h264: false,
            youtube_cookies: None,
            instagram_cookies: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Render a config as pretty TOML (used by `vdm config`).
pub fn to_toml(cfg: &VdmConfig) -> Result<String> {
    Ok(toml::to_string_pretty(cfg)?)
}
