//! Episode discovery and the periodic feed poller.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::PollerConfig;
use crate::feed::parser::{parse_feed, ParsedFeed};
use crate::models::{Feed, JobType};
use crate::repository::episode::NewEpisode;
use crate::repository::{EpisodeRepository, FeedRepository, JobRepository};
use crate::{Error, Result};

/// Result of one discovery pass over a feed
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub new_episode_ids: Vec<i64>,
    pub queued_job_ids: Vec<i64>,
}

/// Walks feeds on a fixed cadence, inserting new episodes and
/// enqueueing downloads for them.
pub struct FeedPoller {
    feeds: FeedRepository,
    episodes: EpisodeRepository,
    jobs: JobRepository,
    client: reqwest::Client,
    config: PollerConfig,
    max_attempts: i64,
    running: Arc<RwLock<bool>>,
}

impl FeedPoller {
    pub fn new(
        feeds: FeedRepository,
        episodes: EpisodeRepository,
        jobs: JobRepository,
        config: PollerConfig,
        max_attempts: i64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            feeds,
            episodes,
            jobs,
            client,
            config,
            max_attempts,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the periodic poll loop. Polls once immediately.
    pub async fn start(self: Arc<Self>) -> JoinHandle<()> {
        *self.running.write().await = true;

        let poller = self;
        tokio::spawn(async move {
            info!(
                "Feed poller running (every {} minutes)",
                poller.config.interval_minutes
            );

            while *poller.running.read().await {
                poller.poll_all_feeds().await;
                sleep(Duration::from_secs(poller.config.interval_minutes * 60)).await;
            }

            info!("Feed poller stopped");
        })
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Poll every feed, enqueueing downloads for all newly discovered
    /// episodes. Per-feed errors are logged, not propagated.
    pub async fn poll_all_feeds(&self) {
        let feeds = match self.feeds.list().await {
            Ok(feeds) => feeds,
            Err(e) => {
                error!("Feed poll failed to list feeds: {}", e);
                return;
            }
        };

        let mut total_new = 0;
        for feed in feeds {
            match self.poll_feed(&feed, true, false).await {
                Ok(result) => {
                    if !result.new_episode_ids.is_empty() {
                        info!(
                            "Feed '{}': {} new episodes",
                            feed.display_title(),
                            result.new_episode_ids.len()
                        );
                        total_new += result.new_episode_ids.len();
                    }
                }
                Err(e) => error!("Failed to poll feed '{}': {}", feed.display_title(), e),
            }
        }

        info!("Feed poll complete. Total new episodes: {}", total_new);
    }

    /// Fetch and ingest one feed
    pub async fn poll_feed(
        &self,
        feed: &Feed,
        auto_queue: bool,
        queue_only_latest: bool,
    ) -> Result<DiscoveryResult> {
        let content = self.fetch(&feed.url).await?;
        let parsed = parse_feed(&content)?;
        self.ingest(feed, &parsed, auto_queue, queue_only_latest).await
    }

    /// Fetch, validate, and register a new feed. Only the newest
    /// episode of a freshly added feed is auto-enqueued.
    pub async fn add_feed(&self, url: &str) -> Result<(Feed, DiscoveryResult)> {
        if self.feeds.get_by_url(url).await?.is_some() {
            return Err(Error::conflict(format!("Feed already exists: {}", url)));
        }

        let content = self.fetch(url).await?;
        let parsed = parse_feed(&content)?;

        if parsed.episodes.is_empty() {
            return Err(Error::validation("Feed has no audio episodes"));
        }

        let feed = self
            .feeds
            .create(
                url,
                &parsed.title,
                parsed.description.as_deref(),
                parsed.image_url.as_deref(),
                parsed.author.as_deref(),
            )
            .await?;

        let result = self.ingest(&feed, &parsed, true, true).await?;
        Ok((feed, result))
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Feed fetch failed: HTTP {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }

    /// Insert newly discovered episodes (dedup by feed and guid) and
    /// optionally enqueue downloads for them.
    pub async fn ingest(
        &self,
        feed: &Feed,
        parsed: &ParsedFeed,
        auto_queue: bool,
        queue_only_latest: bool,
    ) -> Result<DiscoveryResult> {
        let mut result = DiscoveryResult::default();

        for ep in &parsed.episodes {
            if self.episodes.exists(feed.id, &ep.guid).await? {
                continue;
            }

            let episode = self
                .episodes
                .create(
                    feed.id,
                    &NewEpisode {
                        guid: ep.guid.clone(),
                        title: ep.title.clone(),
                        description: ep.description.clone(),
                        audio_url: ep.audio_url.clone(),
                        duration_seconds: ep.duration_seconds,
                        published_at: ep.published_at,
                        transcript_url: ep.transcript_url.clone(),
                    },
                )
                .await?;
            result.new_episode_ids.push(episode.id);
        }

        self.feeds.update_last_polled(feed.id).await?;

        if auto_queue && !result.new_episode_ids.is_empty() {
            let to_queue: &[i64] = if queue_only_latest {
                &result.new_episode_ids[..1]
            } else {
                &result.new_episode_ids[..]
            };

            for &episode_id in to_queue {
                if self.jobs.has_pending_job(episode_id, JobType::Download).await? {
                    continue;
                }

                // New episodes download at high priority
                let job = self
                    .jobs
                    .create(episode_id, JobType::Download, 1, self.max_attempts)
                    .await?;
                result.queued_job_ids.push(job.id);
            }
        }

        Ok(result)
    }
}
