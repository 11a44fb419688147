mod config;
mod download;
mod expand;

pub use config::run_config;
pub use download::{run_download, DownloadArgs};
pub use expand::run_expand;
