//! Queue administration endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use podscribe_core::jobs::{CoordinatorStatus, WorkerStatus};
use podscribe_core::{EpisodeRepository, Error, Job, JobStatus, JobType};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: i64,
    pub episode_id: i64,
    pub job_type: JobType,
    pub priority: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub progress_percent: i64,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub assigned_node_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            episode_id: job.episode_id,
            job_type: job.job_type,
            priority: job.priority,
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            progress_percent: job.progress_percent,
            scheduled_at: job.scheduled_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            next_retry_at: job.next_retry_at,
            error_message: job.error_message,
            assigned_node_id: job.assigned_node_id,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
}

/// Brief job info with the episode title for dashboards
#[derive(Debug, Serialize)]
pub struct JobInfo {
    pub job_id: i64,
    pub episode_id: i64,
    pub episode_title: String,
    pub priority: i64,
    pub progress_percent: i64,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    #[serde(flatten)]
    pub workers: WorkerStatus,
    pub download_running_jobs: Vec<JobInfo>,
    pub download_queued_jobs: Vec<JobInfo>,
    pub transcribe_running_jobs: Vec<JobInfo>,
    pub transcribe_queued_jobs: Vec<JobInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub job_type: Option<JobType>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct QueueEpisodeRequest {
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

/// GET /api/queue — queued jobs ready to run
pub async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let jobs = state.jobs.get_queued_jobs(query.job_type, query.limit).await?;

    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
    }))
}

async fn job_infos(jobs: Vec<Job>, episodes: &EpisodeRepository) -> ApiResult<Vec<JobInfo>> {
    let mut infos = Vec::with_capacity(jobs.len());
    for job in jobs {
        if let Some(episode) = episodes.get_by_id(job.episode_id).await? {
            infos.push(JobInfo {
                job_id: job.id,
                episode_id: job.episode_id,
                episode_title: episode.title,
                priority: job.priority,
                progress_percent: job.progress_percent,
            });
        }
    }
    Ok(infos)
}

/// GET /api/queue/status — queue and worker status
pub async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatusResponse>> {
    let workers = state.worker_manager.get_status().await?;

    let download_running = state.jobs.get_running_jobs(JobType::Download).await?;
    let download_queued = state.jobs.get_queued_jobs(Some(JobType::Download), 20).await?;
    let transcribe_running = state.jobs.get_running_jobs(JobType::Transcribe).await?;
    let transcribe_queued = state.jobs.get_queued_jobs(Some(JobType::Transcribe), 20).await?;

    let coordinator = match &state.coordinator {
        Some(coordinator) => Some(coordinator.get_status().await?),
        None => None,
    };

    Ok(Json(QueueStatusResponse {
        workers,
        download_running_jobs: job_infos(download_running, &state.episodes).await?,
        download_queued_jobs: job_infos(download_queued, &state.episodes).await?,
        transcribe_running_jobs: job_infos(transcribe_running, &state.episodes).await?,
        transcribe_queued_jobs: job_infos(transcribe_queued, &state.episodes).await?,
        coordinator,
    }))
}

/// POST /api/queue/episodes/{id}/download
pub async fn queue_download(
    State(state): State<AppState>,
    Path(episode_id): Path<i64>,
    request: Option<Json<QueueEpisodeRequest>>,
) -> ApiResult<Json<MessageResponse>> {
    let priority = request.map(|Json(r)| r.priority).unwrap_or_else(default_priority);

    let episode = state
        .episodes
        .get_by_id(episode_id)
        .await?
        .ok_or_else(|| Error::not_found("Episode not found"))?;

    if state.jobs.has_pending_job(episode_id, JobType::Download).await? {
        return Err(Error::conflict("Download already queued").into());
    }
    if episode.audio_path.is_some() {
        return Err(Error::conflict("Episode already downloaded").into());
    }

    let job = state
        .jobs
        .create(
            episode_id,
            JobType::Download,
            priority,
            state.config.workers.max_retry_attempts,
        )
        .await?;

    Ok(Json(MessageResponse {
        message: "Download queued".to_string(),
        job_id: Some(job.id),
    }))
}

/// POST /api/queue/episodes/{id}/transcribe
pub async fn queue_transcribe(
    State(state): State<AppState>,
    Path(episode_id): Path<i64>,
    request: Option<Json<QueueEpisodeRequest>>,
) -> ApiResult<Json<MessageResponse>> {
    let priority = request.map(|Json(r)| r.priority).unwrap_or_else(default_priority);

    let episode = state
        .episodes
        .get_by_id(episode_id)
        .await?
        .ok_or_else(|| Error::not_found("Episode not found"))?;

    if episode.audio_path.is_none() {
        return Err(Error::validation("Episode not downloaded yet").into());
    }
    if state.jobs.has_pending_job(episode_id, JobType::Transcribe).await? {
        return Err(Error::conflict("Transcription already queued").into());
    }

    let job = state
        .jobs
        .create(
            episode_id,
            JobType::Transcribe,
            priority,
            state.config.workers.max_retry_attempts,
        )
        .await?;

    Ok(Json(MessageResponse {
        message: "Transcription queued".to_string(),
        job_id: Some(job.id),
    }))
}

/// POST /api/queue/episodes/{id}/process — download + transcribe chain
pub async fn queue_process(
    State(state): State<AppState>,
    Path(episode_id): Path<i64>,
    request: Option<Json<QueueEpisodeRequest>>,
) -> ApiResult<Json<MessageResponse>> {
    let priority = request.map(|Json(r)| r.priority).unwrap_or_else(default_priority);
    let max_attempts = state.config.workers.max_retry_attempts;

    let episode = state
        .episodes
        .get_by_id(episode_id)
        .await?
        .ok_or_else(|| Error::not_found("Episode not found"))?;

    if state.jobs.has_pending_job(episode_id, JobType::Download).await? {
        return Err(Error::conflict("Download already queued").into());
    }

    if episode.audio_path.is_some() {
        if state.jobs.has_pending_job(episode_id, JobType::Transcribe).await? {
            return Err(Error::conflict("Transcription already queued").into());
        }

        let job = state
            .jobs
            .create(episode_id, JobType::Transcribe, priority, max_attempts)
            .await?;
        return Ok(Json(MessageResponse {
            message: "Transcription queued (already downloaded)".to_string(),
            job_id: Some(job.id),
        }));
    }

    // Transcription is auto-queued when the download completes
    let job = state
        .jobs
        .create(episode_id, JobType::Download, priority, max_attempts)
        .await?;

    Ok(Json(MessageResponse {
        message: "Download queued (transcription will follow)".to_string(),
        job_id: Some(job.id),
    }))
}

/// POST /api/queue/{job_id}/retry — admin retry of a failed job
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .jobs
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| Error::not_found("Job not found"))?;

    if !state.jobs.retry_failed_job(job_id).await? {
        return Err(Error::validation("Can only retry failed jobs").into());
    }

    Ok(Json(MessageResponse {
        message: "Job requeued".to_string(),
        job_id: Some(job_id),
    }))
}

/// DELETE /api/queue/{job_id} — cancel a queued job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    let job = state
        .jobs
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| Error::not_found("Job not found"))?;

    if job.status == JobStatus::Running {
        return Err(Error::validation("Cannot cancel running job").into());
    }

    if !state.jobs.cancel_queued(job_id).await? {
        return Err(Error::validation("Job not in queued state").into());
    }

    Ok(Json(MessageResponse {
        message: "Job cancelled".to_string(),
        job_id: Some(job_id),
    }))
}

/// GET /api/queue/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .jobs
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| Error::not_found("Job not found"))?;

    Ok(Json(JobResponse::from(job)))
}
