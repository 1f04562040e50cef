//! Agent behavior against a faked server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{body_json_string, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use podscribe_core::transcription::{
    ProgressFn, SpeechToText, TranscriptResult, TranscriptSegment, TranscriptionService,
};
use podscribe_node::{NodeAgent, NodeClient, NodeConfig};

struct FixedEngine;

#[async_trait]
impl SpeechToText for FixedEngine {
    async fn transcribe(
        &self,
        audio_path: &Path,
        _duration_hint: Option<i64>,
        progress: ProgressFn,
    ) -> podscribe_core::Result<TranscriptResult> {
        // The downloaded bytes must actually be on disk by now
        let bytes = std::fs::read(audio_path).unwrap();
        assert_eq!(bytes, b"mp3-bytes");

        progress(50);
        progress(100);

        Ok(TranscriptResult {
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 1.5,
                text: "From the node".to_string(),
            }],
            language: "en".to_string(),
            language_probability: 0.95,
        })
    }

    fn model_name(&self) -> String {
        "fixed".to_string()
    }
}

fn node_config(server_url: &str) -> NodeConfig {
    NodeConfig {
        server_url: server_url.to_string(),
        node_id: "node-1".to_string(),
        api_key: "secret-key".to_string(),
        name: "test-node".to_string(),
        model: "base".to_string(),
        backend: "test".to_string(),
        transcription_command: None,
        poll_interval_seconds: 1,
        heartbeat_interval_seconds: 1,
    }
}

#[tokio::test]
async fn test_client_claim_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/node-1/claim"))
        .and(header_exists("X-Transcriber-Key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "has_job": false
        })))
        .mount(&server)
        .await;

    let client = NodeClient::new(&server.uri(), "node-1", "secret-key").unwrap();
    assert!(client.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn test_client_release_and_fail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/jobs/7/release"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Job released"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/jobs/7/fail"))
        .and(body_json_string(r#"{"error_message":"boom"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Job marked failed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = NodeClient::new(&server.uri(), "node-1", "secret-key").unwrap();
    client.release(7).await.unwrap();
    client.fail(7, "boom").await.unwrap();
}

#[tokio::test]
async fn test_agent_full_job_cycle() {
    let server = MockServer::start().await;

    // First claim hands out job 42; later claims (poll + prefetch) are empty
    Mock::given(method("POST"))
        .and(path("/api/nodes/node-1/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "has_job": true,
            "job_id": 42,
            "episode_id": 9,
            "episode_title": "Pilot",
            "audio_url": "/api/nodes/jobs/42/audio"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/node-1/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "has_job": false
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/nodes/jobs/42/audio"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=\"pilot.mp3\"")
                .set_body_bytes(b"mp3-bytes".as_slice()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/node-1/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/jobs/42/progress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/nodes/jobs/42/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Transcript saved"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = node_config(&server.uri());
    let client = NodeClient::new(&config.server_url, &config.node_id, &config.api_key).unwrap();
    let transcription = Arc::new(TranscriptionService::with_engine(Arc::new(FixedEngine)));

    let agent = Arc::new(NodeAgent::new(config, client, transcription));
    agent.clone().start().await;

    // Wait until the transcript lands on the server
    let mut completed = false;
    for _ in 0..200 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests
            .iter()
            .any(|r| r.url.path() == "/api/nodes/jobs/42/complete")
        {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(completed, "agent never submitted the transcript");

    agent.stop(Duration::from_secs(5)).await;

    // Verify the submitted transcript body
    let requests = server.received_requests().await.unwrap();
    let complete = requests
        .iter()
        .find(|r| r.url.path() == "/api/nodes/jobs/42/complete")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&complete.body).unwrap();
    let transcript = body["transcript_text"].as_str().unwrap();
    assert!(transcript.starts_with("# Pilot"));
    assert!(transcript.contains("**[00:00]** From the node"));
    assert_eq!(body["model"], "base");
}
