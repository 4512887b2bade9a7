//! `studysync config` – show where the config lives and what is in effect.

use anyhow::Result;
use std::path::Path;
use studysync_core::config::{self, SyncConfig};

pub fn run_config(cfg: &SyncConfig, explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::config_path()?,
    };
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
