use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diff::{DiffLimits, HighlightOptions};

/// Configuration for the forge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP port to listen on
    pub http_port: u16,
    /// Address to bind the HTTP listener to
    pub http_addr: String,
    /// Refuse every git request served over HTTP
    pub disable_http_git: bool,
    /// Require authentication even for pulls from public repositories
    pub require_signin_view: bool,
    /// Value of `Access-Control-Allow-Origin`; CORS is off when empty
    pub access_control_allow_origin: String,
    /// The git executable used for the smart protocol
    pub git_binary: String,
    /// Upper bound for short-lived git commands such as ref advertisement
    pub git_timeout_secs: u64,
    pub diff: DiffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub max_files: usize,
    pub max_file_lines: usize,
    pub max_line_chars: usize,
    pub timeout_secs: u64,
    pub disable_highlight: bool,
    pub edit_cost: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        DiffConfig {
            max_files: 100,
            max_file_lines: 1000,
            max_line_chars: 2000,
            timeout_secs: 60,
            disable_highlight: false,
            edit_cost: 100,
        }
    }
}

impl DiffConfig {
    pub fn limits(&self) -> DiffLimits {
        DiffLimits {
            max_files: self.max_files,
            max_file_lines: self.max_file_lines,
            max_line_chars: self.max_line_chars,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn highlight(&self) -> HighlightOptions {
        HighlightOptions {
            disabled: self.disable_highlight,
            edit_cost: self.edit_cost,
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::default_config()
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.clone(), e))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Config {
            http_port: 3000,
            http_addr: "0.0.0.0".to_string(),
            disable_http_git: false,
            require_signin_view: false,
            access_control_allow_origin: String::new(),
            git_binary: "git".to_string(),
            git_timeout_secs: 60,
            diff: DiffConfig::default(),
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, serde_json::Error),
}
