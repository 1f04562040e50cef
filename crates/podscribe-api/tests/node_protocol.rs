//! End-to-end tests for the node protocol over the assembled router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use podscribe_api::{build_router, AppState};
use podscribe_core::download::AudioFetcher;
use podscribe_core::notify::NoopNotifier;
use podscribe_core::repository::NewEpisode;
use podscribe_core::transcription::{
    ProgressFn, SpeechToText, TranscriptResult, TranscriptionService,
};
use podscribe_core::{Config, Database, JobStatus, JobType};

struct NullFetcher;

#[async_trait]
impl AudioFetcher for NullFetcher {
    async fn fetch(&self, _url: &str, _dest: &std::path::Path) -> podscribe_core::Result<u64> {
        Ok(0)
    }
}

struct NullEngine;

#[async_trait]
impl SpeechToText for NullEngine {
    async fn transcribe(
        &self,
        _audio_path: &std::path::Path,
        _duration_hint: Option<i64>,
        _progress: ProgressFn,
    ) -> podscribe_core::Result<TranscriptResult> {
        unimplemented!("protocol tests never transcribe locally")
    }

    fn model_name(&self) -> String {
        "null".to_string()
    }
}

struct Harness {
    app: Router,
    state: AppState,
    _dir: tempfile::TempDir,
}

async fn setup() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::in_memory().await.unwrap();

    let mut config = Config::default();
    config.storage.path = dir.path().to_path_buf();
    config.storage.temp_path = dir.path().join("tmp");
    config.distributed.enabled = true;

    let state = AppState::new(
        config,
        db,
        Arc::new(NullFetcher),
        Arc::new(TranscriptionService::with_engine(Arc::new(NullEngine))),
        Arc::new(NoopNotifier),
    )
    .unwrap();

    Harness {
        app: build_router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(path: &str, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-Transcriber-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn post_empty(path: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(key) = key {
        builder = builder.header("X-Transcriber-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn get(path: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(key) = key {
        builder = builder.header("X-Transcriber-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn register_node(h: &Harness, name: &str) -> (String, String) {
    let (status, body) = request(
        &h.app,
        post_json(
            "/api/nodes/register",
            None,
            json!({"name": name, "url": "http://node:8001", "model": "base"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    (
        body["node_id"].as_str().unwrap().to_string(),
        body["api_key"].as_str().unwrap().to_string(),
    )
}

/// Seed a feed + episode with downloaded audio and a queued transcribe job
async fn seed_transcribe_job(h: &Harness) -> (i64, i64) {
    let feed = h
        .state
        .feeds
        .create("https://example.com/rss", "Cast", None, None, None)
        .await
        .unwrap();
    let episode = h
        .state
        .episodes
        .create(
            feed.id,
            &NewEpisode {
                guid: "ep-1".to_string(),
                title: "Pilot".to_string(),
                description: None,
                audio_url: "https://example.com/ep.mp3".to_string(),
                duration_seconds: Some(60),
                published_at: None,
                transcript_url: None,
            },
        )
        .await
        .unwrap();

    let audio_path = h._dir.path().join("pilot.mp3");
    tokio::fs::write(&audio_path, b"fake-audio-bytes").await.unwrap();
    h.state
        .episodes
        .update_audio_path(episode.id, &audio_path.to_string_lossy())
        .await
        .unwrap();

    let job = h
        .state
        .jobs
        .create(episode.id, JobType::Transcribe, 1, 3)
        .await
        .unwrap();

    (episode.id, job.id)
}

#[tokio::test]
async fn test_register_and_heartbeat() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;

    let (status, body) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/{}/heartbeat", node_id),
            Some(&api_key),
            json!({"model": "large-v3", "backend": "cuda"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let node = h.state.nodes.get_by_id(&node_id).await.unwrap().unwrap();
    assert_eq!(node.model.as_deref(), Some("large-v3"));
    assert!(node.last_heartbeat.is_some());
}

#[tokio::test]
async fn test_heartbeat_requires_token() {
    let h = setup().await;
    let (node_id, _) = register_node(&h, "gpu-1").await;

    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/heartbeat", node_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/heartbeat", node_id), Some("wrong-key")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_heartbeat_rejects_other_nodes_id() {
    let h = setup().await;
    let (_, api_key) = register_node(&h, "gpu-1").await;
    let (other_id, _) = register_node(&h, "gpu-2").await;

    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/heartbeat", other_id), Some(&api_key)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_claim_empty_queue() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;

    let (status, body) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_job"], false);
}

#[tokio::test]
async fn test_claim_assigns_job_and_marks_node_busy() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (episode_id, job_id) = seed_transcribe_job(&h).await;

    let (status, body) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_job"], true);
    assert_eq!(body["job_id"].as_i64().unwrap(), job_id);
    assert_eq!(body["episode_id"].as_i64().unwrap(), episode_id);
    assert_eq!(body["episode_title"], "Pilot");
    assert_eq!(
        body["audio_url"].as_str().unwrap(),
        format!("/api/nodes/jobs/{}/audio", job_id)
    );

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.assigned_node_id.as_deref(), Some(node_id.as_str()));
    assert_eq!(job.attempts, 1);

    let node = h.state.nodes.get_by_id(&node_id).await.unwrap().unwrap();
    assert_eq!(node.current_job_id, Some(job_id));

    // Second claim finds nothing
    let (_, body) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;
    assert_eq!(body["has_job"], false);
}

#[tokio::test]
async fn test_audio_stream_restricted_to_assignee() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, other_key) = register_node(&h, "gpu-2").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    let (_, body) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;
    assert_eq!(body["has_job"], true);

    let audio_path = format!("/api/nodes/jobs/{}/audio", job_id);

    let response = h
        .app
        .clone()
        .oneshot(get(&audio_path, Some(&api_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"fake-audio-bytes");

    let (status, _) = request(&h.app, get(&audio_path, Some(&other_key))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_progress_updates_job() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/progress", job_id),
            Some(&api_key),
            json!({"progress_percent": 42}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.progress_percent, 42);
}

#[tokio::test]
async fn test_complete_writes_transcript_and_is_idempotent() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (episode_id, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let transcript = "# Pilot\n\n*Language: en (99.0% confidence)*\n\n**[00:00]** Hello\n";
    let (status, _) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/complete", job_id),
            Some(&api_key),
            json!({"transcript_text": transcript, "model": "large-v3"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);

    let episode = h.state.episodes.get_by_id(episode_id).await.unwrap().unwrap();
    let transcript_path = episode.transcript_path.unwrap();
    let written = tokio::fs::read_to_string(&transcript_path).await.unwrap();
    assert_eq!(written, transcript);

    let node = h.state.nodes.get_by_id(&node_id).await.unwrap().unwrap();
    assert!(node.current_job_id.is_none());

    // Completing again reports success without touching anything
    let (status, body) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/complete", job_id),
            Some(&api_key),
            json!({"transcript_text": transcript}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("already"));
}

#[tokio::test]
async fn test_complete_by_wrong_node_conflicts() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, other_key) = register_node(&h, "gpu-2").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/complete", job_id),
            Some(&other_key),
            json!({"transcript_text": "stolen"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_fail_by_wrong_node_forbidden() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, other_key) = register_node(&h, "gpu-2").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/fail", job_id),
            Some(&other_key),
            json!({"error_message": "not mine"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The assignee's attempt is untouched and the job is still running
    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.assigned_node_id.as_deref(), Some(node_id.as_str()));
}

#[tokio::test]
async fn test_fail_completed_job_conflicts() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;
    request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/complete", job_id),
            Some(&api_key),
            json!({"transcript_text": "# done"}),
        ),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/fail", job_id),
            Some(&api_key),
            json!({"error_message": "too late"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_fail_requeues_with_attempt_burned() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_json(
            &format!("/api/nodes/jobs/{}/fail", job_id),
            Some(&api_key),
            json!({"error_message": "CUDA out of memory"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 1);
    assert!(job.next_retry_at.is_some());
    assert_eq!(job.error_message.as_deref(), Some("CUDA out of memory"));
}

#[tokio::test]
async fn test_release_preserves_attempts() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/nodes/jobs/{}/release", job_id), Some(&api_key)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 1);
    assert!(job.next_retry_at.is_none());
    assert!(job.assigned_node_id.is_none());
    assert!(job.claimed_at.is_none());

    // Released work is immediately claimable again
    let (_, body) = request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;
    assert_eq!(body["has_job"], true);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn test_release_by_wrong_node_forbidden() {
    let h = setup().await;
    let (node_id, api_key) = register_node(&h, "gpu-1").await;
    let (_, other_key) = register_node(&h, "gpu-2").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    request(
        &h.app,
        post_empty(&format!("/api/nodes/{}/claim", node_id), Some(&api_key)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/nodes/jobs/{}/release", job_id), Some(&other_key)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.assigned_node_id.as_deref(), Some(node_id.as_str()));
}

#[tokio::test]
async fn test_release_unassigned_job_forbidden() {
    let h = setup().await;
    let (_, api_key) = register_node(&h, "gpu-1").await;
    let (_, job_id) = seed_transcribe_job(&h).await;

    // Queued, never claimed: no node may release it
    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/nodes/jobs/{}/release", job_id), Some(&api_key)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let job = h.state.jobs.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let h = setup().await;
    let (_, api_key) = register_node(&h, "gpu-1").await;

    let (status, _) = request(
        &h.app,
        post_json(
            "/api/nodes/jobs/9999/progress",
            Some(&api_key),
            json!({"progress_percent": 10}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queue_endpoints_roundtrip() {
    let h = setup().await;
    let (episode_id, job_id) = seed_transcribe_job(&h).await;

    // The seeded transcribe job shows up in the queue listing
    let (status, body) = request(&h.app, get("/api/queue?job_type=transcribe", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

    // Duplicate transcription enqueue conflicts
    let (status, _) = request(
        &h.app,
        post_empty(&format!("/api/queue/episodes/{}/transcribe", episode_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Cancel it, then retry rejects (not failed)
    let (status, _) = request(
        &h.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/queue/{}", job_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&h.app, get(&format!("/api/queue/{}", job_id), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
