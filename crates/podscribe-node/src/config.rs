//! Node credentials and local settings, persisted after registration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use podscribe_core::{Error, Result};

/// Saved node identity and local transcription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub server_url: String,
    pub node_id: String,
    pub api_key: String,
    pub name: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_backend")]
    pub backend: String,

    /// Command invoked by the subprocess engine adapter
    #[serde(default)]
    pub transcription_command: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

fn default_model() -> String {
    "base".to_string()
}

fn default_backend() -> String {
    "subprocess".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

/// Default config location: `~/.podscribe/node.toml`
pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".podscribe").join("node.toml")
}

impl NodeConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "No node configuration at {} ({}). Run 'podscribe-node register' first.",
                path.display(),
                e
            ))
        })?;

        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
