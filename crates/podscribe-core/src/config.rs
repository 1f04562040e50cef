use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for podscribe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub distributed: DistributedConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            workers: WorkerConfig::default(),
            distributed: DistributedConfig::default(),
            poller: PollerConfig::default(),
            transcription: TranscriptionConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment, falling back to default paths
    pub fn from_env() -> Result<Self, crate::Error> {
        if let Ok(config_path) = std::env::var("PODSCRIBE_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = [
            "./podscribe.toml",
            "./config/podscribe.toml",
            "/etc/podscribe/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.workers.max_concurrent_downloads == 0 {
            return Err(Error::Config(
                "max_concurrent_downloads must be > 0".to_string(),
            ));
        }

        if self.distributed.heartbeat_timeout_seconds == 0 {
            return Err(Error::Config(
                "heartbeat_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.distributed.job_timeout_hours == 0 {
            return Err(Error::Config("job_timeout_hours must be > 0".to_string()));
        }

        Ok(())
    }

    /// Create required directories for the database and storage roots
    pub fn ensure_directories(&self) -> Result<(), crate::Error> {
        if let Some(parent) = self.database.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.storage.path)?;
        std::fs::create_dir_all(&self.storage.temp_path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL advertised to remote nodes
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    #[serde(default = "default_temp_path")]
    pub temp_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            temp_path: default_temp_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent download workers
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Default max attempts for new jobs
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: i64,

    /// Seconds a worker sleeps when the queue is empty
    #[serde(default = "default_idle_poll_seconds")]
    pub idle_poll_seconds: u64,

    /// HTTP request timeout for downloads and feed fetches (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_retry_attempts: default_max_retry_attempts(),
            idle_poll_seconds: default_idle_poll_seconds(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Enable the distributed transcription protocol
    #[serde(default)]
    pub enabled: bool,

    /// Seconds without a heartbeat before a node is marked offline
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: i64,

    /// Hours a running job may go without completing before reclamation
    #[serde(default = "default_job_timeout_hours")]
    pub job_timeout_hours: i64,

    /// Seconds between coordinator ticks
    #[serde(default = "default_coordinator_interval")]
    pub coordinator_interval_seconds: u64,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            job_timeout_hours: default_job_timeout_hours(),
            coordinator_interval_seconds: default_coordinator_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Minutes between feed polls
    #[serde(default = "default_poll_interval_minutes")]
    pub interval_minutes: u64,

    /// User-Agent sent with RSS and audio requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_poll_interval_minutes(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Model name reported with transcripts
    #[serde(default = "default_model")]
    pub model: String,

    /// Backend label reported in heartbeats
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Command invoked by the subprocess engine adapter
    #[serde(default)]
    pub command: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            backend: default_backend(),
            command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Webhook endpoint (ntfy-style: POST with title/message headers)
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/podscribe.db")
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/podcasts")
}

fn default_temp_path() -> PathBuf {
    PathBuf::from("./data/temp")
}

fn default_max_concurrent_downloads() -> usize {
    2
}

fn default_max_retry_attempts() -> i64 {
    3
}

fn default_idle_poll_seconds() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_heartbeat_timeout() -> i64 {
    60
}

fn default_job_timeout_hours() -> i64 {
    2
}

fn default_coordinator_interval() -> u64 {
    30
}

fn default_poll_interval_minutes() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("podscribe/{} (Podcast Transcription Service)", crate::VERSION)
}

fn default_model() -> String {
    "base".to_string()
}

fn default_backend() -> String {
    "subprocess".to_string()
}
