use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for the curl transport (optional `[transport]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-transfer timeout in seconds.
    pub timeout_secs: u64,
    pub follow_redirects: bool,
    pub user_agent: String,
    /// PEM bundle of trusted certificate authorities. When unset, or when the
    /// file cannot be read, the system trust store is used.
    pub ca_bundle: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            timeout_secs: 30,
            follow_redirects: true,
            user_agent: format!("muxfetch/{}", env!("CARGO_PKG_VERSION")),
            ca_bundle: None,
        }
    }
}

/// Global configuration loaded from `~/.config/muxfetch/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Maximum transport operations the curl transport runs at once; further
    /// starts queue inside the transport. The multiplexer itself is unbounded.
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 20,
            transport: TransportConfig::default(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("muxfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MuxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MuxConfig::default();
        let toml = render(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from(&path)
}

/// Render a config as it would be written to config.toml.
pub fn render(cfg: &MuxConfig) -> Result<String> {
    Ok(toml::to_string_pretty(cfg)?)
}

/// Load configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<MuxConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: MuxConfig =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
