//! `muxfetch config` – show where the config lives and what is in effect.

use anyhow::Result;
use muxfetch_core::config::{self, MuxConfig};
use std::path::Path;

pub fn run_config(path: &Path, cfg: &MuxConfig) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", config::render(cfg)?);
    Ok(())
}
