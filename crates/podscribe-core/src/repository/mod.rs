//! Repositories are the sole write gateways to their tables.
//!
//! The `JobRepository` owns every `job_queue` mutation, the
//! `NodeRepository` owns `worker_node`; other components read through
//! these or call their named transition methods.

pub mod episode;
pub mod feed;
pub mod job;
pub mod node;

pub use episode::{EpisodeRepository, NewEpisode};
pub use feed::FeedRepository;
pub use job::{JobCounts, JobRepository, ResetOutcome};
pub use node::NodeRepository;
