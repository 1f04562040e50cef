//! Typed HTTP client for the server's node protocol.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use podscribe_core::{Error, Result};

pub const NODE_KEY_HEADER: &str = "X-Transcriber-Key";

/// A job handed out by the server's claim endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub episode_id: i64,
    #[serde(default)]
    pub episode_title: Option<String>,
    pub audio_url: String,
}

#[derive(Debug, Deserialize)]
struct ClaimResponse {
    has_job: bool,
    job_id: Option<i64>,
    episode_id: Option<i64>,
    episode_title: Option<String>,
    audio_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    model: &'a str,
    backend: &'a str,
}

#[derive(Debug, Serialize)]
struct ProgressBody {
    progress_percent: i64,
}

#[derive(Debug, Serialize)]
struct CompleteBody<'a> {
    transcript_text: &'a str,
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct FailBody<'a> {
    error_message: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    node_id: String,
    api_key: String,
}

/// Node-side protocol client; every request carries the bearer header
pub struct NodeClient {
    http: reqwest::Client,
    base_url: String,
    node_id: String,
}

impl NodeClient {
    pub fn new(server_url: &str, node_id: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            NODE_KEY_HEADER,
            HeaderValue::from_str(api_key)
                .map_err(|_| Error::config("API key contains invalid header characters"))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
            node_id: node_id.to_string(),
        })
    }

    /// One-time registration; no authentication by design
    pub async fn register(
        server_url: &str,
        name: &str,
        url: &str,
        model: &str,
        backend: &str,
    ) -> Result<(String, String)> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let response = client
            .post(format!(
                "{}/api/nodes/register",
                server_url.trim_end_matches('/')
            ))
            .json(&serde_json::json!({
                "name": name,
                "url": url,
                "model": model,
                "backend": backend,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Registration failed: HTTP {}",
                response.status()
            )));
        }

        let body: RegisterResponse = response.json().await?;
        Ok((body.node_id, body.api_key))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn heartbeat(&self, model: &str, backend: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/nodes/{}/heartbeat", self.node_id)))
            .json(&HeartbeatBody { model, backend })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Heartbeat failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Try to claim a job; None when the queue has nothing for us
    pub async fn claim(&self) -> Result<Option<ClaimedJob>> {
        let response = self
            .http
            .post(self.url(&format!("/api/nodes/{}/claim", self.node_id)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Claim failed: HTTP {}",
                response.status()
            )));
        }

        let body: ClaimResponse = response.json().await?;
        if !body.has_job {
            return Ok(None);
        }

        match (body.job_id, body.episode_id, body.audio_url) {
            (Some(job_id), Some(episode_id), Some(audio_url)) => Ok(Some(ClaimedJob {
                job_id,
                episode_id,
                episode_title: body.episode_title,
                audio_url,
            })),
            _ => Err(Error::network("Claim response missing job fields")),
        }
    }

    /// Stream a claimed job's audio into `dest_dir`
    pub async fn download_audio(&self, audio_url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let response = self.http.get(self.url(audio_url)).send().await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Audio download failed: HTTP {}",
                response.status()
            )));
        }

        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_disposition_filename)
            .unwrap_or_else(|| "audio.mp3".to_string());

        let dest = dest_dir.join(filename);
        let mut file = tokio::fs::File::create(&dest).await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::network(format!("Audio stream error: {}", e)))?;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;

        debug!("Downloaded audio to {}", dest.display());
        Ok(dest)
    }

    pub async fn report_progress(&self, job_id: i64, percent: i64) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/nodes/jobs/{}/progress", job_id)))
            .json(&ProgressBody {
                progress_percent: percent,
            })
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Progress report failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn complete(&self, job_id: i64, transcript_text: &str, model: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/nodes/jobs/{}/complete", job_id)))
            .json(&CompleteBody {
                transcript_text,
                model,
            })
            // Large transcripts get a longer window
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Complete failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn fail(&self, job_id: i64, error_message: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/nodes/jobs/{}/fail", job_id)))
            .json(&FailBody { error_message })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Fail report failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn release(&self, job_id: i64) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/nodes/jobs/{}/release", job_id)))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Release failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn parse_content_disposition_filename(value: &str) -> Option<String> {
    let part = value.split("filename=").nth(1)?;
    let name = part.trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_disposition() {
        assert_eq!(
            parse_content_disposition_filename("attachment; filename=\"ep.mp3\""),
            Some("ep.mp3".to_string())
        );
        assert_eq!(
            parse_content_disposition_filename("attachment; filename=plain.mp3"),
            Some("plain.mp3".to_string())
        );
        assert_eq!(parse_content_disposition_filename("attachment"), None);
    }
}
