pub mod agent;
pub mod client;
pub mod config;

pub use agent::NodeAgent;
pub use client::{ClaimedJob, NodeClient};
pub use config::{default_config_path, NodeConfig};
