use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::models::{EpisodeStatus, Job, JobStatus, JobType, LOCAL_NODE_ID};
use crate::{Error, Result};

/// Seconds a node heartbeat reserves transcription work for the remote fleet
const REMOTE_RESERVATION_WINDOW_SECS: i64 = 60;

/// Error recorded when a job exhausts its attempts through reclamation
const MAX_ATTEMPTS_ERROR: &str = "Max attempts exceeded";

/// Outcome of a reclaim/reset pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetOutcome {
    pub requeued: u64,
    pub failed: u64,
}

/// Job counts by status for one job type
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounts {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Repository for the job queue.
///
/// Every state transition is a single atomic update scoped by `id`
/// (and a `status` precondition where racing callers are possible), so
/// concurrent workers surface as "zero rows updated" rather than
/// corrupted state.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new queued job.
    ///
    /// Callers enforce the no-duplicate-pending invariant with
    /// `has_pending_job` first; a race that slips a duplicate through is
    /// wasteful but benign.
    pub async fn create(
        &self,
        episode_id: i64,
        job_type: JobType,
        priority: i64,
        max_attempts: i64,
    ) -> Result<Job> {
        let now = Utc::now();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO job_queue (
                episode_id, job_type, priority, status, attempts,
                max_attempts, scheduled_at, progress_percent, created_at
            )
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, 0, ?6)
            RETURNING id
            "#,
        )
        .bind(episode_id)
        .bind(job_type)
        .bind(priority)
        .bind(JobStatus::Queued)
        .bind(max_attempts)
        .bind(now)
        .fetch_one(self.db.pool())
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| Error::Database(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, job_id: i64) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM job_queue WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(job)
    }

    /// The single highest-priority dispatchable job of the given type.
    ///
    /// Ordering is `priority ASC, scheduled_at ASC, id ASC`; rows whose
    /// `next_retry_at` lies in the future are invisible. Non-destructive:
    /// the caller still has to win `claim_job`.
    ///
    /// With `local_only` set, returns nothing while any online remote
    /// node has heartbeated inside the reservation window, giving the
    /// fleet first refusal on transcription work.
    pub async fn get_next_job(&self, job_type: JobType, local_only: bool) -> Result<Option<Job>> {
        if local_only && self.remote_node_available().await? {
            return Ok(None);
        }

        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM job_queue
            WHERE job_type = ?1
              AND status = ?2
              AND (next_retry_at IS NULL OR next_retry_at <= ?3)
            ORDER BY priority ASC, scheduled_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(job_type)
        .bind(JobStatus::Queued)
        .bind(now)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    async fn remote_node_available(&self) -> Result<bool> {
        let window_start = Utc::now() - Duration::seconds(REMOTE_RESERVATION_WINDOW_SECS);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM worker_node WHERE status = 'online' AND last_heartbeat >= ?1",
        )
        .bind(window_start)
        .fetch_one(self.db.pool())
        .await?;

        Ok(count > 0)
    }

    /// Atomically claim a queued job for a worker.
    ///
    /// Returns `false` when the conditional update touched zero rows,
    /// meaning another worker got there first; the caller must move on.
    /// `attempts` is incremented exactly once, here.
    pub async fn claim_job(&self, job_id: i64, node_id: &str) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?1, assigned_node_id = ?2, claimed_at = ?3,
                started_at = ?3, attempts = attempts + 1
            WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(JobStatus::Running)
        .bind(node_id)
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Queued)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim for the local worker pool
    pub async fn mark_running(&self, job_id: i64) -> Result<bool> {
        self.claim_job(job_id, LOCAL_NODE_ID).await
    }

    /// Fetch-and-claim loop: returns the first dispatchable job this
    /// worker wins, or None when the queue is drained.
    pub async fn claim_next(
        &self,
        job_type: JobType,
        node_id: &str,
        local_only: bool,
    ) -> Result<Option<Job>> {
        loop {
            let Some(job) = self.get_next_job(job_type, local_only).await? else {
                return Ok(None);
            };

            if self.claim_job(job.id, node_id).await? {
                return self.get_by_id(job.id).await;
            }
            // Lost the race; the next iteration sees a fresh queue head.
        }
    }

    /// Best-effort progress update; clamped to 0–100, never escalates
    pub async fn update_progress(&self, job_id: i64, percent: i64) -> Result<()> {
        let percent = percent.clamp(0, 100);

        sqlx::query("UPDATE job_queue SET progress_percent = ?1 WHERE id = ?2")
            .bind(percent)
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    pub async fn mark_completed(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?1, completed_at = ?2, progress_percent = 100
            WHERE id = ?3
            "#,
        )
        .bind(JobStatus::Completed)
        .bind(Utc::now())
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Mark a job failed, requeueing with exponential backoff while
    /// attempts remain (5, 25, 125 minutes). Returns the resulting
    /// status so callers can react to a terminal failure.
    pub async fn mark_failed(
        &self,
        job_id: i64,
        error_message: &str,
        retry: bool,
    ) -> Result<JobStatus> {
        let now = Utc::now();

        let Some(job) = self.get_by_id(job_id).await? else {
            return Err(Error::not_found(format!("Job {} not found", job_id)));
        };

        if retry && job.attempts < job.max_attempts {
            let backoff_minutes = 5_i64.saturating_pow(job.attempts.max(0) as u32);
            let next_retry = now + Duration::minutes(backoff_minutes);

            sqlx::query(
                r#"
                UPDATE job_queue
                SET status = ?1, error_message = ?2, next_retry_at = ?3,
                    assigned_node_id = NULL, claimed_at = NULL
                WHERE id = ?4
                "#,
            )
            .bind(JobStatus::Queued)
            .bind(error_message)
            .bind(next_retry)
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

            Ok(JobStatus::Queued)
        } else {
            sqlx::query(
                r#"
                UPDATE job_queue
                SET status = ?1, error_message = ?2, completed_at = ?3,
                    assigned_node_id = NULL, claimed_at = NULL
                WHERE id = ?4
                "#,
            )
            .bind(JobStatus::Failed)
            .bind(error_message)
            .bind(now)
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

            Ok(JobStatus::Failed)
        }
    }

    /// Return a claimed job to the queue without burning an attempt.
    ///
    /// Used by node shutdown and failed prefetches. Assignment and
    /// `claimed_at` are cleared; `started_at` is left alone so the
    /// stale-job clock never resets on a re-claim.
    pub async fn unclaim_job(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = CASE WHEN status = ?1 THEN ?2 ELSE status END,
                assigned_node_id = NULL, claimed_at = NULL
            WHERE id = ?3
            "#,
        )
        .bind(JobStatus::Running)
        .bind(JobStatus::Queued)
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Requeue or terminally fail every running job older than the
    /// timeout, measured from `started_at`.
    ///
    /// Jobs with attempts left are requeued untouched and immediately
    /// eligible; exhausted jobs (including legacy rows whose attempts
    /// already exceed the cap) go to `failed` and never loop again.
    pub async fn reclaim_stale_jobs(&self, timeout_hours: i64) -> Result<ResetOutcome> {
        let cutoff = Utc::now() - Duration::hours(timeout_hours);
        self.reset_running(Some(cutoff)).await
    }

    /// Startup recovery: every `running` row is orphaned by definition
    /// and is requeued or failed with the same policy as reclamation,
    /// ignoring the time window. Idempotent.
    pub async fn reset_running_jobs(&self) -> Result<ResetOutcome> {
        self.reset_running(None).await
    }

    /// Administrative sibling of `reclaim_stale_jobs` with a
    /// caller-chosen threshold
    pub async fn batch_force_reset_stuck(&self, threshold_hours: i64) -> Result<ResetOutcome> {
        self.reclaim_stale_jobs(threshold_hours).await
    }

    async fn reset_running(&self, cutoff: Option<DateTime<Utc>>) -> Result<ResetOutcome> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        // Far-future sentinel keeps the SQL shape identical for both paths.
        let cutoff = cutoff.unwrap_or(now + Duration::days(1));

        let requeued = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?1, assigned_node_id = NULL, claimed_at = NULL
            WHERE status = ?2 AND attempts < max_attempts
              AND (started_at IS NULL OR started_at < ?3)
            "#,
        )
        .bind(JobStatus::Queued)
        .bind(JobStatus::Running)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let exhausted: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, episode_id FROM job_queue
            WHERE status = ?1 AND attempts >= max_attempts
              AND (started_at IS NULL OR started_at < ?2)
            "#,
        )
        .bind(JobStatus::Running)
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for &(job_id, episode_id) in &exhausted {
            sqlx::query(
                r#"
                UPDATE job_queue
                SET status = ?1, error_message = ?2, completed_at = ?3,
                    assigned_node_id = NULL, claimed_at = NULL
                WHERE id = ?4
                "#,
            )
            .bind(JobStatus::Failed)
            .bind(MAX_ATTEMPTS_ERROR)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE episode SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
            )
            .bind(EpisodeStatus::Failed)
            .bind(MAX_ATTEMPTS_ERROR)
            .bind(now)
            .bind(episode_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ResetOutcome {
            requeued,
            failed: exhausted.len() as u64,
        })
    }

    /// Explicit admin retry of a terminally failed job. The only path
    /// that resets `attempts`. Returns false if the job is not failed.
    pub async fn retry_failed_job(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?1, attempts = 0, error_message = NULL,
                next_retry_at = NULL, completed_at = NULL, progress_percent = 0
            WHERE id = ?2 AND status = ?3
            "#,
        )
        .bind(JobStatus::Queued)
        .bind(job_id)
        .bind(JobStatus::Failed)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a queued job (running jobs cannot be cancelled)
    pub async fn cancel_queued(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_queue WHERE id = ?1 AND status = ?2")
            .bind(job_id)
            .bind(JobStatus::Queued)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete completed/failed jobs older than N days
    pub async fn cleanup_completed(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days);

        let result = sqlx::query(
            "DELETE FROM job_queue WHERE status IN (?1, ?2) AND completed_at < ?3",
        )
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn has_pending_job(&self, episode_id: i64, job_type: JobType) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM job_queue
            WHERE episode_id = ?1 AND job_type = ?2 AND status IN (?3, ?4)
            "#,
        )
        .bind(episode_id)
        .bind(job_type)
        .bind(JobStatus::Queued)
        .bind(JobStatus::Running)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(found.is_some())
    }

    pub async fn get_queued_jobs(
        &self,
        job_type: Option<JobType>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let now = Utc::now();

        let jobs = match job_type {
            Some(jt) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM job_queue
                    WHERE job_type = ?1 AND status = ?2
                      AND (next_retry_at IS NULL OR next_retry_at <= ?3)
                    ORDER BY priority ASC, scheduled_at ASC, id ASC
                    LIMIT ?4
                    "#,
                )
                .bind(jt)
                .bind(JobStatus::Queued)
                .bind(now)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM job_queue
                    WHERE status = ?1
                      AND (next_retry_at IS NULL OR next_retry_at <= ?2)
                    ORDER BY priority ASC, scheduled_at ASC, id ASC
                    LIMIT ?3
                    "#,
                )
                .bind(JobStatus::Queued)
                .bind(now)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(jobs)
    }

    pub async fn get_running_jobs(&self, job_type: JobType) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM job_queue
            WHERE job_type = ?1 AND status = ?2
            ORDER BY started_at ASC
            "#,
        )
        .bind(job_type)
        .bind(JobStatus::Running)
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    pub async fn get_failed_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM job_queue
            WHERE status = ?1
            ORDER BY completed_at DESC
            LIMIT ?2
            "#,
        )
        .bind(JobStatus::Failed)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    pub async fn get_by_episode(&self, episode_id: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM job_queue WHERE episode_id = ?1 ORDER BY created_at DESC",
        )
        .bind(episode_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    pub async fn get_jobs_by_node(&self, node_id: &str) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM job_queue
            WHERE assigned_node_id = ?1 AND status = ?2
            ORDER BY claimed_at ASC
            "#,
        )
        .bind(node_id)
        .bind(JobStatus::Running)
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    pub async fn count_by_status(&self, job_type: JobType) -> Result<JobCounts> {
        let rows: Vec<(JobStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM job_queue WHERE job_type = ?1 GROUP BY status",
        )
        .bind(job_type)
        .fetch_all(self.db.pool())
        .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status {
                JobStatus::Queued => counts.queued = count,
                JobStatus::Running => counts.running = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
            }
        }

        Ok(counts)
    }

    /// Finish a download job and enqueue the follow-on transcription in
    /// one transaction, so there is no observable window where the
    /// download is done and nothing is queued.
    pub async fn complete_download(
        &self,
        job_id: i64,
        episode_id: i64,
        audio_path: &str,
        max_attempts: i64,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            UPDATE episode SET audio_path = ?1, status = ?2, error_message = NULL, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(audio_path)
        .bind(EpisodeStatus::AudioReady)
        .bind(now)
        .bind(episode_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE job_queue SET status = ?1, completed_at = ?2, progress_percent = 100
            WHERE id = ?3
            "#,
        )
        .bind(JobStatus::Completed)
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        let pending: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM job_queue
            WHERE episode_id = ?1 AND job_type = ?2 AND status IN (?3, ?4)
            "#,
        )
        .bind(episode_id)
        .bind(JobType::Transcribe)
        .bind(JobStatus::Queued)
        .bind(JobStatus::Running)
        .fetch_optional(&mut *tx)
        .await?;

        if pending.is_none() {
            // Freshly downloaded audio jumps the transcription queue.
            sqlx::query(
                r#"
                INSERT INTO job_queue (
                    episode_id, job_type, priority, status, attempts,
                    max_attempts, scheduled_at, progress_percent, created_at
                )
                VALUES (?1, ?2, 1, ?3, 0, ?4, ?5, 0, ?5)
                "#,
            )
            .bind(episode_id)
            .bind(JobType::Transcribe)
            .bind(JobStatus::Queued)
            .bind(max_attempts)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Finish a transcription job and record the transcript atomically
    pub async fn complete_transcription(
        &self,
        job_id: i64,
        episode_id: i64,
        transcript_path: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            UPDATE episode
            SET transcript_path = ?1, status = ?2, error_message = NULL, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(transcript_path)
        .bind(EpisodeStatus::Completed)
        .bind(now)
        .bind(episode_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE job_queue SET status = ?1, completed_at = ?2, progress_percent = 100
            WHERE id = ?3
            "#,
        )
        .bind(JobStatus::Completed)
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
