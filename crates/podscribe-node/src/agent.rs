//! The long-running worker agent: heartbeat, poll-and-process, and
//! audio prefetch loops.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use podscribe_core::jobs::ProgressThrottle;
use podscribe_core::transcription::{ProgressFn, TranscriptionService};

use crate::client::{ClaimedJob, NodeClient};
use crate::config::NodeConfig;

/// A job claimed ahead of time with its audio already on disk
struct PrefetchedJob {
    job: ClaimedJob,
    audio_path: PathBuf,
    // Held so the audio survives until processing finishes
    _temp_dir: TempDir,
}

pub struct NodeAgent {
    config: NodeConfig,
    client: Arc<NodeClient>,
    transcription: Arc<TranscriptionService>,
    running: Arc<AtomicBool>,
    transcribing: Arc<AtomicBool>,
    current_job: Arc<Mutex<Option<i64>>>,
    prefetch: Arc<Mutex<Option<PrefetchedJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeAgent {
    pub fn new(
        config: NodeConfig,
        client: NodeClient,
        transcription: Arc<TranscriptionService>,
    ) -> Self {
        Self {
            config,
            client: Arc::new(client),
            transcription,
            running: Arc::new(AtomicBool::new(false)),
            transcribing: Arc::new(AtomicBool::new(false)),
            current_job: Arc::new(Mutex::new(None)),
            prefetch: Arc::new(Mutex::new(None)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn current_job(&self) -> Option<i64> {
        *self.current_job.lock().await
    }

    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Agent already running");
            return;
        }

        let mut handles = self.handles.lock().await;

        let agent = self.clone();
        handles.push(tokio::spawn(async move { agent.heartbeat_loop().await }));
        info!("Started heartbeat loop");

        let agent = self.clone();
        handles.push(tokio::spawn(async move { agent.poll_loop().await }));
        info!("Started job poll loop");

        let agent = self.clone();
        handles.push(tokio::spawn(async move { agent.prefetch_loop().await }));
        info!("Started prefetch loop");
    }

    /// Stop gracefully: release any in-flight and prefetched jobs so
    /// their attempts are not burned, then join the loops.
    pub async fn stop(&self, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping agent...");

        if let Some(job_id) = self.current_job.lock().await.take() {
            info!("Releasing job {} back to queue", job_id);
            if let Err(e) = self.client.release(job_id).await {
                warn!("Failed to release job on shutdown: {}", e);
            }
        }

        self.release_prefetched().await;

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Agent loop did not stop within timeout");
            }
        }

        info!("Agent stopped");
    }

    async fn release_prefetched(&self) {
        let prefetched = self.prefetch.lock().await.take();
        if let Some(p) = prefetched {
            info!("Releasing prefetched job {}", p.job.job_id);
            if let Err(e) = self.client.release(p.job.job_id).await {
                warn!("Failed to release prefetched job: {}", e);
            }
        }
    }

    async fn heartbeat_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self
                .client
                .heartbeat(&self.config.model, &self.config.backend)
                .await
            {
                warn!("Heartbeat error: {}", e);
            }

            sleep(Duration::from_secs(self.config.heartbeat_interval_seconds)).await;
        }
    }

    async fn poll_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let prefetched = self.prefetch.lock().await.take();

            if let Some(p) = prefetched {
                info!("Using prefetched job {}", p.job.job_id);
                self.process_job(p.job, p.audio_path).await;
                continue;
            }

            match self.client.claim().await {
                Ok(Some(job)) => {
                    let temp_dir = match tempfile::tempdir() {
                        Ok(dir) => dir,
                        Err(e) => {
                            error!("Failed to create temp dir: {}", e);
                            sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                            continue;
                        }
                    };

                    match self.client.download_audio(&job.audio_url, temp_dir.path()).await {
                        Ok(audio_path) => {
                            self.process_job(job, audio_path).await;
                            drop(temp_dir);
                        }
                        Err(e) => {
                            let message = format!("Failed to download audio: {}", e);
                            error!("Job {}: {}", job.job_id, message);
                            if let Err(e) = self.client.fail(job.job_id, &message).await {
                                warn!("Failed to report failure: {}", e);
                            }
                        }
                    }
                }
                Ok(None) => {
                    sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                }
                Err(e) => {
                    warn!("Poll error: {}", e);
                    sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                }
            }
        }
    }

    /// While a transcription runs, claim and download the next job so
    /// the GPU never idles between episodes. A failed prefetch is
    /// released, never failed, so its attempts stay untouched.
    async fn prefetch_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            sleep(Duration::from_secs(1)).await;

            if !self.transcribing.load(Ordering::SeqCst) {
                continue;
            }
            if self.prefetch.lock().await.is_some() {
                continue;
            }

            let job = match self.client.claim().await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Prefetch claim error: {}", e);
                    continue;
                }
            };

            info!(
                "Prefetching job {}: {}",
                job.job_id,
                job.episode_title.as_deref().unwrap_or("Unknown")
            );

            let temp_dir = match tempfile::tempdir() {
                Ok(dir) => dir,
                Err(e) => {
                    warn!("Prefetch temp dir failed: {}", e);
                    let _ = self.client.release(job.job_id).await;
                    continue;
                }
            };

            match self.client.download_audio(&job.audio_url, temp_dir.path()).await {
                Ok(audio_path) => {
                    info!("Prefetch ready: {}", job.job_id);
                    *self.prefetch.lock().await = Some(PrefetchedJob {
                        job,
                        audio_path,
                        _temp_dir: temp_dir,
                    });
                }
                Err(e) => {
                    warn!("Prefetch download failed: {}", e);
                    if let Err(e) = self.client.release(job.job_id).await {
                        warn!("Failed to release prefetched job: {}", e);
                    }
                }
            }
        }
    }

    async fn process_job(&self, job: ClaimedJob, audio_path: PathBuf) {
        let job_id = job.job_id;
        let title = job.episode_title.clone().unwrap_or_else(|| "Unknown".to_string());
        info!("Processing job {}: {}", job_id, title);

        *self.current_job.lock().await = Some(job_id);
        self.transcribing.store(true, Ordering::SeqCst);

        let result = self
            .transcription
            .transcribe(&audio_path, None, self.progress_reporter(job_id))
            .await;

        self.transcribing.store(false, Ordering::SeqCst);

        match result {
            Ok(transcript) => {
                let markdown = transcript.to_markdown(&title);
                info!("Transcription complete ({} chars)", markdown.len());

                if let Err(e) = self
                    .client
                    .complete(job_id, &markdown, &self.config.model)
                    .await
                {
                    error!("Failed to submit transcript for job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                let message = format!("Transcription failed: {}", e);
                warn!("Job {}: {}", job_id, message);
                if let Err(e) = self.client.fail(job_id, &message).await {
                    error!("Failed to report failure for job {}: {}", job_id, e);
                }
            }
        }

        *self.current_job.lock().await = None;
    }

    /// Throttled progress reporting back to the server; failures are
    /// logged and dropped.
    fn progress_reporter(&self, job_id: i64) -> ProgressFn {
        let client = self.client.clone();
        let throttle = std::sync::Mutex::new(ProgressThrottle::standard());

        Arc::new(move |percent: i64| {
            let should = throttle
                .lock()
                .map(|mut t| t.should_report(percent))
                .unwrap_or(false);

            if should {
                let client = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.report_progress(job_id, percent).await {
                        tracing::debug!("Progress report error: {}", e);
                    }
                });
            }
        })
    }
}
