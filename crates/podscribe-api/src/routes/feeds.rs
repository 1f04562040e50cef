//! Feed and episode administration endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use podscribe_core::models::EpisodeStatus;
use podscribe_core::{Episode, Error, Feed};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddFeedRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub custom_title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub last_polled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Feed> for FeedResponse {
    fn from(feed: Feed) -> Self {
        Self {
            id: feed.id,
            url: feed.url,
            title: feed.title,
            custom_title: feed.custom_title,
            description: feed.description,
            image_url: feed.image_url,
            author: feed.author,
            last_polled_at: feed.last_polled_at,
            created_at: feed.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddFeedResponse {
    pub feed: FeedResponse,
    pub new_episodes: usize,
    pub queued_jobs: usize,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub new_episodes: usize,
    pub queued_jobs: usize,
}

#[derive(Debug, Serialize)]
pub struct EpisodeResponse {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub audio_url: String,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: EpisodeStatus,
    pub audio_path: Option<String>,
    pub transcript_path: Option<String>,
    pub error_message: Option<String>,
}

impl From<Episode> for EpisodeResponse {
    fn from(episode: Episode) -> Self {
        Self {
            id: episode.id,
            feed_id: episode.feed_id,
            guid: episode.guid,
            title: episode.title,
            audio_url: episode.audio_url,
            duration_seconds: episode.duration_seconds,
            published_at: episode.published_at,
            status: episode.status,
            audio_path: episode.audio_path,
            transcript_path: episode.transcript_path,
            error_message: episode.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EpisodeListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/feeds — validate, register, and ingest a new feed. Only
/// the newest episode is auto-enqueued on first add.
pub async fn add_feed(
    State(state): State<AppState>,
    Json(request): Json<AddFeedRequest>,
) -> ApiResult<Json<AddFeedResponse>> {
    let (feed, result) = state.poller.add_feed(&request.url).await?;

    info!(
        "Added feed '{}' with {} episodes",
        feed.display_title(),
        result.new_episode_ids.len()
    );

    Ok(Json(AddFeedResponse {
        feed: FeedResponse::from(feed),
        new_episodes: result.new_episode_ids.len(),
        queued_jobs: result.queued_job_ids.len(),
    }))
}

/// GET /api/feeds
pub async fn list_feeds(State(state): State<AppState>) -> ApiResult<Json<Vec<FeedResponse>>> {
    let feeds = state.feeds.list().await?;
    Ok(Json(feeds.into_iter().map(FeedResponse::from).collect()))
}

/// DELETE /api/feeds/{id} — cascades to episodes and their jobs
pub async fn delete_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.feeds.delete(feed_id).await? {
        return Err(Error::not_found("Feed not found").into());
    }

    Ok(Json(MessageResponse {
        message: "Feed deleted".to_string(),
    }))
}

/// POST /api/feeds/{id}/poll — poll one feed now, queueing every new
/// episode
pub async fn poll_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<i64>,
) -> ApiResult<Json<PollResponse>> {
    let feed = state
        .feeds
        .get_by_id(feed_id)
        .await?
        .ok_or_else(|| Error::not_found("Feed not found"))?;

    let result = state.poller.poll_feed(&feed, true, false).await?;

    Ok(Json(PollResponse {
        new_episodes: result.new_episode_ids.len(),
        queued_jobs: result.queued_job_ids.len(),
    }))
}

/// GET /api/feeds/{id}/episodes
pub async fn list_episodes(
    State(state): State<AppState>,
    Path(feed_id): Path<i64>,
    Query(query): Query<EpisodeListQuery>,
) -> ApiResult<Json<Vec<EpisodeResponse>>> {
    state
        .feeds
        .get_by_id(feed_id)
        .await?
        .ok_or_else(|| Error::not_found("Feed not found"))?;

    let episodes = state.episodes.list_by_feed(feed_id, query.limit).await?;
    Ok(Json(episodes.into_iter().map(EpisodeResponse::from).collect()))
}

/// GET /api/episodes/{id}
pub async fn get_episode(
    State(state): State<AppState>,
    Path(episode_id): Path<i64>,
) -> ApiResult<Json<EpisodeResponse>> {
    let episode = state
        .episodes
        .get_by_id(episode_id)
        .await?
        .ok_or_else(|| Error::not_found("Episode not found"))?;

    Ok(Json(EpisodeResponse::from(episode)))
}
