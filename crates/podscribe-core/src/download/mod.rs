//! Audio download port and its HTTP implementation.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::{Error, Result};

/// Downloader port used by the download workers
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Fetch `url` into `dest`, returning the byte count.
    ///
    /// Implementations must not leave partial files at `dest` on error.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Streaming HTTP downloader
pub struct HttpAudioFetcher {
    client: reqwest::Client,
}

impl HttpAudioFetcher {
    pub fn new(user_agent: &str, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(timeout_seconds))
            // No total-request timeout: large episodes legitimately
            // stream for minutes. Stalls are caught by job reclamation.
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            // 4xx means the audio is gone; workers treat Validation as
            // non-retryable input errors.
            if status.is_client_error() {
                return Err(Error::validation(format!("Audio fetch failed: HTTP {}", status)));
            }
            return Err(Error::network(format!("Audio fetch failed: HTTP {}", status)));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut written: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(Error::network(format!("Audio stream interrupted: {}", e)));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, dest).await?;

        info!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}
