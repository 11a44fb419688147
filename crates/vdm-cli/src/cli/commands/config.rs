//! `vdm config` – show the effective configuration.

use anyhow::Result;
use vdm_core::config::{self, VdmConfig};

pub fn run_config(cfg: &VdmConfig) -> Result<()> {
    println!("config file: {}", config::config_path()?.display());
    println!();
    print!("{}", config::to_toml(cfg)?);
    Ok(())
}
