//! Remote node protocol: register, heartbeat, claim, audio streaming,
//! progress, complete, fail, release.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::info;

use podscribe_core::models::{EpisodeStatus, NodeStatus};
use podscribe_core::{Error, Job, JobStatus, JobType};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthedNode;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub url: String,
    pub model: Option<String>,
    pub backend: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub node_id: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct HeartbeatRequest {
    pub model: Option<String>,
    pub backend: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub has_job: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl ClaimResponse {
    fn empty() -> Self {
        Self {
            has_job: false,
            job_id: None,
            episode_id: None,
            episode_title: None,
            audio_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress_percent: i64,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub transcript_text: String,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error_message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/nodes/register (unauthenticated by design; the minted key
/// is the node's only proof of identity thereafter)
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterResponse>> {
    if request.name.trim().is_empty() {
        return Err(Error::validation("Node name must not be empty").into());
    }

    let node = state
        .nodes
        .register(
            &request.name,
            &request.url,
            request.model.as_deref(),
            request.backend.as_deref(),
        )
        .await?;

    info!("Registered node '{}' ({})", node.name, node.id);
    Ok(Json(RegisterResponse {
        node_id: node.id,
        api_key: node.api_key,
    }))
}

/// POST /api/nodes/{id}/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
    request: Option<Json<HeartbeatRequest>>,
) -> ApiResult<Json<StatusResponse>> {
    require_own_node(&node.id, &node_id)?;

    let Json(body) = request.unwrap_or_default();
    state
        .nodes
        .update_heartbeat(&node.id, body.model.as_deref(), body.backend.as_deref())
        .await?;

    Ok(Json(StatusResponse { status: "ok" }))
}

/// POST /api/nodes/{id}/claim — at most one transcription job
pub async fn claim(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
) -> ApiResult<Json<ClaimResponse>> {
    require_own_node(&node.id, &node_id)?;

    loop {
        let Some(job) = state
            .jobs
            .claim_next(JobType::Transcribe, &node.id, false)
            .await?
        else {
            return Ok(Json(ClaimResponse::empty()));
        };

        // A transcribe job whose audio is gone cannot be served to a
        // node; fail it terminally and look for another.
        let episode = state.episodes.get_by_id(job.episode_id).await?;
        let Some(episode) = episode.filter(|e| e.audio_path.is_some()) else {
            state
                .jobs
                .mark_failed(job.id, "Episode audio not available", false)
                .await?;
            continue;
        };

        state
            .nodes
            .update_status(&node.id, NodeStatus::Busy, Some(job.id))
            .await?;

        info!("Node {} claimed job {}", node.id, job.id);
        return Ok(Json(ClaimResponse {
            has_job: true,
            job_id: Some(job.id),
            episode_id: Some(episode.id),
            episode_title: Some(episode.title),
            audio_url: Some(format!("/api/nodes/jobs/{}/audio", job.id)),
        }));
    }
}

/// GET /api/nodes/jobs/{job_id}/audio — streams the audio blob to the
/// assigned node
pub async fn fetch_audio(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
) -> Result<Response, ApiError> {
    let job = load_job(&state, job_id).await?;
    require_assignee(&job, &node.id)?;

    let episode = state
        .episodes
        .get_by_id(job.episode_id)
        .await?
        .ok_or_else(|| Error::not_found("Episode not found"))?;

    let audio_path = episode
        .audio_path
        .ok_or_else(|| Error::not_found("Episode audio not available"))?;

    let file = tokio::fs::File::open(&audio_path)
        .await
        .map_err(|e| Error::storage(format!("Failed to open audio file: {}", e)))?;

    let size = file.metadata().await.ok().map(|m| m.len());
    let filename = std::path::Path::new(&audio_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio.mp3".to_string());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        );
    if let Some(size) = size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }

    let body = Body::from_stream(ReaderStream::new(file));
    builder
        .body(body)
        .map_err(|e| ApiError(Error::Other(e.to_string())))
}

/// POST /api/nodes/jobs/{job_id}/progress
pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let job = load_job(&state, job_id).await?;
    require_assignee(&job, &node.id)?;

    state.jobs.update_progress(job_id, request.progress_percent).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

/// POST /api/nodes/jobs/{job_id}/complete
///
/// Idempotent-friendly: completing an already-completed job returns
/// 200; a job owned by another node returns 409.
pub async fn complete(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let job = load_job(&state, job_id).await?;

    if job.status == JobStatus::Completed {
        return Ok(Json(MessageResponse {
            message: "Job already completed".to_string(),
        }));
    }

    if job.status != JobStatus::Running || job.assigned_node_id.as_deref() != Some(node.id.as_str())
    {
        return Err(Error::conflict("Job is not assigned to this node").into());
    }

    let episode = state
        .episodes
        .get_by_id(job.episode_id)
        .await?
        .ok_or_else(|| Error::not_found("Episode not found"))?;
    let feed = state
        .feeds
        .get_by_id(episode.feed_id)
        .await?
        .ok_or_else(|| Error::not_found("Feed not found"))?;

    let dest = state.storage.transcript_path(
        feed.display_title(),
        &episode.title,
        episode.published_at,
    );
    state
        .storage
        .write_atomic(&dest, request.transcript_text.as_bytes())
        .await?;

    state
        .jobs
        .complete_transcription(job.id, episode.id, &dest.to_string_lossy())
        .await?;

    if let Some(model) = request.model.as_deref() {
        state.nodes.update_heartbeat(&node.id, Some(model), None).await?;
    }
    state
        .nodes
        .update_status(&node.id, NodeStatus::Online, None)
        .await?;

    info!("Node {} completed job {}", node.id, job_id);
    Ok(Json(MessageResponse {
        message: "Transcript saved".to_string(),
    }))
}

/// POST /api/nodes/jobs/{job_id}/fail — burns an attempt. Nodes should
/// prefer `release` when the failure is their own fault.
pub async fn fail(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
    Json(request): Json<FailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let job = load_job(&state, job_id).await?;
    require_assignee(&job, &node.id)?;

    if job.status != JobStatus::Running {
        return Err(Error::conflict("Job is not running").into());
    }

    let status = state
        .jobs
        .mark_failed(job_id, &request.error_message, true)
        .await?;

    if status == JobStatus::Failed {
        state
            .episodes
            .update_status(job.episode_id, EpisodeStatus::Failed, Some(&request.error_message))
            .await?;
    }

    state
        .nodes
        .update_status(&node.id, NodeStatus::Online, None)
        .await?;

    info!("Node {} failed job {}: {}", node.id, job_id, request.error_message);
    Ok(Json(MessageResponse {
        message: "Job marked failed".to_string(),
    }))
}

/// POST /api/nodes/jobs/{job_id}/release — returns the job to the
/// queue with attempts preserved
pub async fn release(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Extension(AuthedNode(node)): Extension<AuthedNode>,
) -> ApiResult<Json<MessageResponse>> {
    let job = load_job(&state, job_id).await?;
    require_assignee(&job, &node.id)?;

    if job.status != JobStatus::Running {
        return Err(Error::conflict("Job is not running").into());
    }

    state.jobs.unclaim_job(job_id).await?;
    state
        .nodes
        .update_status(&node.id, NodeStatus::Online, None)
        .await?;

    info!("Node {} released job {}", node.id, job_id);
    Ok(Json(MessageResponse {
        message: "Job released".to_string(),
    }))
}

async fn load_job(state: &AppState, job_id: i64) -> Result<Job, ApiError> {
    state
        .jobs
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Job {} not found", job_id)).into())
}

fn require_own_node(authed_id: &str, path_id: &str) -> Result<(), ApiError> {
    if authed_id != path_id {
        return Err(Error::forbidden("API key does not match node id").into());
    }
    Ok(())
}

fn require_assignee(job: &Job, node_id: &str) -> Result<(), ApiError> {
    if job.assigned_node_id.as_deref() != Some(node_id) {
        return Err(Error::forbidden("Job is not assigned to this node").into());
    }
    Ok(())
}
