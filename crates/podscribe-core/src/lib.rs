pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod repository;
pub mod storage;
pub mod transcription;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use models::{
    Episode, EpisodeStatus, Feed, Job, JobStatus, JobType, NodeStatus, WorkerNode, LOCAL_NODE_ID,
};
pub use repository::{
    EpisodeRepository, FeedRepository, JobCounts, JobRepository, NodeRepository, ResetOutcome,
};

/// Current version of podscribe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
