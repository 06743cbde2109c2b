//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/gridlink/config.toml`. Every field has a
//! default, so a missing file is not an error; environment overrides for the
//! segment and socket names take precedence over both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Shell command spawned into the PTY.
    pub shell: String,
    /// Initial grid dimensions.
    pub cols: u16,
    pub rows: u16,
    /// Control socket path.
    pub socket_path: PathBuf,
    /// Base name for the shared grid segment.
    pub shm_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            cols: 80,
            rows: 24,
            socket_path: gridlink_protocol::socket_path(),
            shm_path: gridlink_protocol::shm_path_base(),
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when no
    /// config file exists.
    pub fn load() -> Result<Self> {
        match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and parse a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.cols >= 1 && self.cols as usize <= gridlink_protocol::MAX_COLS,
            "cols must be within 1..={}",
            gridlink_protocol::MAX_COLS
        );
        anyhow::ensure!(
            self.rows >= 1 && self.rows as usize <= gridlink_protocol::MAX_ROWS,
            "rows must be within 1..={}",
            gridlink_protocol::MAX_ROWS
        );
        Ok(())
    }
}

fn config_file_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("gridlink").join("config.toml"))
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
