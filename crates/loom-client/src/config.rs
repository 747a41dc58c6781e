//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for loom
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model to request from the backend
    pub model: Option<String>,
    /// Tools the backend is allowed to run without prompting
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Extra file or directory paths attached as context
    #[serde(default)]
    pub context_paths: Vec<String>,
    /// Override for the conversation storage directory
    pub data_dir: Option<String>,
    /// Log filter directive (overridden by LOOM_LOG)
    pub log_filter: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loom")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for LOOM_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("LOOM_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file. A missing or malformed file yields defaults;
    /// startup never fails on configuration.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# loom configuration file
# Place at ~/.config/loom/config.toml (Linux/Mac) or %APPDATA%\loom\config.toml (Windows)

# Model to request from the backend (optional)
# model = "default"

# Tools the backend may run without prompting
allowed_tools = []

# Extra file or directory paths attached as context
context_paths = []

# Override the conversation storage directory (optional)
# data_dir = "~/.local/share/loom"

# Log filter directive, same syntax as LOOM_LOG (optional)
# log_filter = "loom_engine=debug"
"#
}
