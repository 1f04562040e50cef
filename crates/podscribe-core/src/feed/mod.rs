//! RSS ingestion: parsing, episode discovery, and the periodic poller.

pub mod parser;
pub mod poller;

pub use parser::{parse_duration, parse_feed, ParsedEpisode, ParsedFeed};
pub use poller::{DiscoveryResult, FeedPoller};
