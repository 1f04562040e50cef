//! Local worker pool: N download workers and one serial transcription
//! worker, all pulling from the job repository.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::download::AudioFetcher;
use crate::jobs::progress::ProgressThrottle;
use crate::models::{EpisodeStatus, Episode, Feed, Job, JobStatus, JobType, LOCAL_NODE_ID};
use crate::notify::{Notification, Notifier};
use crate::repository::{EpisodeRepository, FeedRepository, JobCounts, JobRepository};
use crate::storage::Storage;
use crate::transcription::{ProgressFn, TranscriptionService};
use crate::{Error, Result};

/// Worker pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Everything a worker needs to process jobs
pub struct WorkerContext {
    pub jobs: JobRepository,
    pub episodes: EpisodeRepository,
    pub feeds: FeedRepository,
    pub storage: Storage,
    pub fetcher: Arc<dyn AudioFetcher>,
    pub transcription: Arc<TranscriptionService>,
    pub notifier: Arc<dyn Notifier>,
    pub config: WorkerConfig,
    /// When set, the transcription worker gives remote nodes first
    /// refusal on transcription jobs
    pub distributed_enabled: bool,
}

/// Status snapshot for the queue API
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub download_workers: usize,
    pub transcribe_workers: usize,
    pub download_queue: JobCounts,
    pub transcribe_queue: JobCounts,
    pub distributed_enabled: bool,
}

/// Manages the download and transcription workers
pub struct WorkerManager {
    ctx: Arc<WorkerContext>,
    state: Arc<RwLock<WorkerState>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerManager {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            state: Arc::new(RwLock::new(WorkerState::Starting)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the worker pool.
    ///
    /// Any job still `running` at this point is orphaned from a prior
    /// run, so the startup reset happens before the first worker spawns.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == WorkerState::Running {
                warn!("Workers already running");
                return Ok(());
            }
            *state = WorkerState::Running;
        }

        let outcome = self.ctx.jobs.reset_running_jobs().await?;
        if outcome.requeued > 0 || outcome.failed > 0 {
            info!(
                "Reset orphaned jobs: {} requeued, {} failed (max attempts)",
                outcome.requeued, outcome.failed
            );
        }

        let mut handles = self.handles.lock().await;

        for i in 0..self.ctx.config.max_concurrent_downloads {
            let manager = self.clone();
            handles.push(tokio::spawn(async move {
                manager.download_worker(i).await;
            }));
            info!("Started download worker {}", i);
        }

        let manager = self.clone();
        handles.push(tokio::spawn(async move {
            manager.transcribe_worker().await;
        }));
        info!("Started transcription worker");

        Ok(())
    }

    /// Signal stop and join workers within the timeout. In-flight jobs
    /// may be left `running`; the next startup reset recovers them.
    pub async fn stop(&self, timeout: Duration) {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Running {
                return;
            }
            *state = WorkerState::Stopping;
        }

        info!("Stopping workers...");
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                // Dropping the handle detaches the task; an abandoned
                // job is recovered by the next startup reset.
                warn!("Worker did not stop within timeout");
            }
        }

        *self.state.write().await = WorkerState::Stopped;
        info!("All workers stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.state.read().await == WorkerState::Running
    }

    pub async fn get_status(&self) -> Result<WorkerStatus> {
        Ok(WorkerStatus {
            running: self.is_running().await,
            download_workers: self.ctx.config.max_concurrent_downloads,
            transcribe_workers: 1,
            download_queue: self.ctx.jobs.count_by_status(JobType::Download).await?,
            transcribe_queue: self.ctx.jobs.count_by_status(JobType::Transcribe).await?,
            distributed_enabled: self.ctx.distributed_enabled,
        })
    }

    async fn idle(&self) {
        sleep(Duration::from_secs(self.ctx.config.idle_poll_seconds)).await;
    }

    async fn download_worker(&self, worker_index: usize) {
        while *self.state.read().await == WorkerState::Running {
            match self
                .ctx
                .jobs
                .claim_next(JobType::Download, LOCAL_NODE_ID, false)
                .await
            {
                Ok(Some(job)) => {
                    info!(
                        "Download worker {} processing job {} (attempt {}/{})",
                        worker_index, job.id, job.attempts, job.max_attempts
                    );
                    if let Err(e) = self.process_download_job(&job).await {
                        // Errors are routed to mark_failed inside; this is
                        // the store-unavailable path only.
                        error!("Download worker {} error: {}", worker_index, e);
                        self.idle().await;
                    }
                }
                Ok(None) => self.idle().await,
                Err(e) => {
                    error!("Download worker {} queue error: {}", worker_index, e);
                    self.idle().await;
                }
            }
        }
    }

    async fn transcribe_worker(&self) {
        while *self.state.read().await == WorkerState::Running {
            match self
                .ctx
                .jobs
                .claim_next(JobType::Transcribe, LOCAL_NODE_ID, self.ctx.distributed_enabled)
                .await
            {
                Ok(Some(job)) => {
                    info!(
                        "Processing transcription job {} (attempt {}/{})",
                        job.id, job.attempts, job.max_attempts
                    );
                    if let Err(e) = self.process_transcribe_job(&job).await {
                        error!("Transcription worker error: {}", e);
                        self.idle().await;
                    }
                }
                Ok(None) => self.idle().await,
                Err(e) => {
                    error!("Transcription worker queue error: {}", e);
                    self.idle().await;
                }
            }
        }
    }

    async fn load_episode_and_feed(&self, job: &Job) -> Result<Option<(Episode, Feed)>> {
        let Some(episode) = self.ctx.episodes.get_by_id(job.episode_id).await? else {
            self.ctx
                .jobs
                .mark_failed(job.id, "Episode not found", false)
                .await?;
            return Ok(None);
        };

        let Some(feed) = self.ctx.feeds.get_by_id(episode.feed_id).await? else {
            self.ctx
                .jobs
                .mark_failed(job.id, "Feed not found", false)
                .await?;
            return Ok(None);
        };

        Ok(Some((episode, feed)))
    }

    async fn process_download_job(&self, job: &Job) -> Result<()> {
        let Some((episode, feed)) = self.load_episode_and_feed(job).await? else {
            return Ok(());
        };

        self.ctx
            .episodes
            .update_status(episode.id, EpisodeStatus::Downloading, None)
            .await?;

        let dest = self.ctx.storage.audio_path(
            feed.display_title(),
            &episode.title,
            episode.published_at,
            &episode.audio_url,
        );
        let filename = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let temp = self.ctx.storage.temp_download_path(&filename);

        // Stream into the temp area first; the rename into the library
        // is the commit point.
        match self.ctx.fetcher.fetch(&episode.audio_url, &temp).await {
            Ok(bytes) => {
                self.ctx.storage.promote(&temp, &dest).await?;
                info!("Download job {} fetched {} bytes", job.id, bytes);
                self.ctx
                    .jobs
                    .complete_download(
                        job.id,
                        episode.id,
                        &dest.to_string_lossy(),
                        self.ctx.config.max_retry_attempts,
                    )
                    .await?;
            }
            Err(e) => {
                self.handle_download_failure(job, &episode, &feed, e).await?;
            }
        }

        Ok(())
    }

    async fn handle_download_failure(
        &self,
        job: &Job,
        episode: &Episode,
        feed: &Feed,
        error: Error,
    ) -> Result<()> {
        let retry = !matches!(error, Error::Validation(_));
        let message = error.to_string();
        warn!("Download job {} failed: {}", job.id, message);

        let status = self.ctx.jobs.mark_failed(job.id, &message, retry).await?;

        if status == JobStatus::Failed {
            self.ctx
                .episodes
                .update_status(episode.id, EpisodeStatus::Failed, Some(&message))
                .await?;
            self.ctx
                .notifier
                .notify(Notification::DownloadFailed {
                    episode_title: episode.title.clone(),
                    feed_title: feed.display_title().to_string(),
                    error: message,
                })
                .await;
        } else {
            self.ctx
                .episodes
                .update_status(episode.id, EpisodeStatus::New, Some(&message))
                .await?;
        }

        Ok(())
    }

    async fn process_transcribe_job(&self, job: &Job) -> Result<()> {
        let Some((episode, feed)) = self.load_episode_and_feed(job).await? else {
            return Ok(());
        };

        let Some(audio_path) = episode.audio_path.clone() else {
            self.ctx
                .jobs
                .mark_failed(job.id, "Episode not downloaded", false)
                .await?;
            self.ctx
                .episodes
                .update_status(episode.id, EpisodeStatus::NeedsAudio, None)
                .await?;
            return Ok(());
        };

        self.ctx
            .episodes
            .update_status(episode.id, EpisodeStatus::Transcribing, None)
            .await?;

        let progress = self.progress_reporter(job.id);
        let result = self
            .ctx
            .transcription
            .transcribe(
                std::path::Path::new(&audio_path),
                episode.duration_seconds,
                progress,
            )
            .await;

        match result {
            Ok(transcript) => {
                let markdown = transcript.to_markdown(&episode.title);
                let dest = self.ctx.storage.transcript_path(
                    feed.display_title(),
                    &episode.title,
                    episode.published_at,
                );

                self.ctx.storage.write_atomic(&dest, markdown.as_bytes()).await?;
                self.ctx
                    .jobs
                    .complete_transcription(job.id, episode.id, &dest.to_string_lossy())
                    .await?;

                info!("Transcription job {} completed", job.id);
                self.ctx
                    .notifier
                    .notify(Notification::TranscriptionComplete {
                        episode_title: episode.title.clone(),
                        feed_title: feed.display_title().to_string(),
                    })
                    .await;
            }
            Err(e) => {
                let retry = !matches!(e, Error::Validation(_));
                let message = e.to_string();
                warn!("Transcription job {} failed: {}", job.id, message);

                let status = self.ctx.jobs.mark_failed(job.id, &message, retry).await?;

                if status == JobStatus::Failed {
                    self.ctx
                        .episodes
                        .update_status(episode.id, EpisodeStatus::Failed, Some(&message))
                        .await?;
                    self.ctx
                        .notifier
                        .notify(Notification::TranscriptionFailed {
                            episode_title: episode.title.clone(),
                            feed_title: feed.display_title().to_string(),
                            error: message,
                        })
                        .await;
                } else {
                    self.ctx
                        .episodes
                        .update_status(episode.id, EpisodeStatus::AudioReady, Some(&message))
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Throttled progress callback writing through the job repository.
    /// Updates are best-effort; a failed write never fails the job.
    fn progress_reporter(&self, job_id: i64) -> ProgressFn {
        let jobs = self.ctx.jobs.clone();
        let throttle = std::sync::Mutex::new(ProgressThrottle::standard());

        Arc::new(move |percent: i64| {
            let should = throttle
                .lock()
                .map(|mut t| t.should_report(percent))
                .unwrap_or(false);

            if should {
                let jobs = jobs.clone();
                tokio::spawn(async move {
                    if let Err(e) = jobs.update_progress(job_id, percent).await {
                        tracing::debug!("Failed to update progress for job {}: {}", job_id, e);
                    }
                });
            }
        })
    }
}
