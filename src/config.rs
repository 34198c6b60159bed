use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::document::TextEncoding;
use crate::error::{ConvertError, Result};

const CONFIG_DIR: &str = "fileconv";
const CONFIG_FILE: &str = "fileconv.toml";

fn default_output_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_quality() -> u8 {
    95
}

fn default_true() -> bool {
    true
}

fn default_encoding() -> TextEncoding {
    TextEncoding::Utf8
}

fn default_history_limit() -> usize {
    10
}

/// Defaults applied to every batch. Read-only: nothing is ever written back.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_true")]
    pub include_headers: bool,
    #[serde(default = "default_encoding")]
    pub encoding: TextEncoding,
    /// Explicit transcoder binary; `ffmpeg` on PATH when unset
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            quality: default_quality(),
            include_headers: true,
            encoding: default_encoding(),
            ffmpeg_path: None,
            history_limit: default_history_limit(),
        }
    }
}

impl AppConfig {
    /// Parse a config file; `.json` files as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        let invalid = |reason: String| ConvertError::Config {
            path: path.to_path_buf(),
            reason,
        };

        let config: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => {
                serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?
            }
            _ => toml::from_str(&text).map_err(|e| invalid(e.to_string()))?,
        };

        if !(1..=100).contains(&config.quality) {
            return Err(invalid(format!(
                "quality must be between 1 and 100, got {}",
                config.quality
            )));
        }
        Ok(config)
    }

    /// Places searched for a config file, in order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut tried: Vec<PathBuf> = Vec::new();
        if let Some(mut d) = dirs::config_dir() {
            d.push(CONFIG_DIR);
            d.push(CONFIG_FILE);
            tried.push(d);
        }
        tried.push(PathBuf::from(CONFIG_FILE));
        tried
    }

    /// Explicit path if given, else the first existing search path, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for p in Self::search_paths() {
            if p.exists() {
                debug!(path = %p.display(), "loading config");
                return Self::from_file(&p);
            }
        }
        Ok(Self::default())
    }
}
