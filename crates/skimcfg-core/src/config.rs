//! Extension configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.

use crate::error::{Result, SkimError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings for the SkimmedCFG extension and its CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Root folder of the ComfyUI backend
    pub comfy_backend_folder: PathBuf,
    /// Look for the downloaded node folder at startup
    pub detect_installed: bool,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            comfy_backend_folder: PathBuf::from("dlbackend/ComfyUI"),
            detect_installed: true,
            log: LogConfig::default(),
        }
    }
}

impl ExtensionConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ExtensionConfig = toml::from_str(content)?;
        if config.comfy_backend_folder.as_os_str().is_empty() {
            return Err(SkimError::Config(
                "comfy_backend_folder must not be empty".to_string(),
            ));
        }
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
