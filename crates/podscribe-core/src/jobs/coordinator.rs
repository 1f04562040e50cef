//! Distributed coordinator: offlines silent nodes and reclaims stale
//! in-flight jobs on a fixed cadence.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::config::DistributedConfig;
use crate::models::{EpisodeStatus, JobStatus, NodeStatus};
use crate::repository::{EpisodeRepository, JobRepository, NodeRepository, ResetOutcome};
use crate::Result;

/// Coordinator status snapshot
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CoordinatorStatus {
    pub nodes_online: usize,
    pub nodes_offline: usize,
    pub last_requeued: u64,
    pub last_failed: u64,
}

pub struct DistributedCoordinator {
    jobs: JobRepository,
    nodes: NodeRepository,
    episodes: EpisodeRepository,
    config: DistributedConfig,
    running: Arc<RwLock<bool>>,
    last_outcome: Arc<Mutex<ResetOutcome>>,
}

impl DistributedCoordinator {
    pub fn new(
        jobs: JobRepository,
        nodes: NodeRepository,
        episodes: EpisodeRepository,
        config: DistributedConfig,
    ) -> Self {
        Self {
            jobs,
            nodes,
            episodes,
            config,
            running: Arc::new(RwLock::new(false)),
            last_outcome: Arc::new(Mutex::new(ResetOutcome {
                requeued: 0,
                failed: 0,
            })),
        }
    }

    pub async fn start(self: Arc<Self>) -> JoinHandle<()> {
        *self.running.write().await = true;

        let coordinator = self;
        tokio::spawn(async move {
            info!(
                "Coordinator running (tick every {}s, heartbeat timeout {}s, job timeout {}h)",
                coordinator.config.coordinator_interval_seconds,
                coordinator.config.heartbeat_timeout_seconds,
                coordinator.config.job_timeout_hours
            );

            while *coordinator.running.read().await {
                if let Err(e) = coordinator.tick().await {
                    // A failed tick is abandoned; the next one retries.
                    error!("Coordinator tick failed: {}", e);
                }
                sleep(Duration::from_secs(
                    coordinator.config.coordinator_interval_seconds,
                ))
                .await;
            }

            info!("Coordinator stopped");
        })
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// One coordinator pass: offline stale nodes (releasing whatever
    /// they held), then reclaim stale jobs across the board.
    pub async fn tick(&self) -> Result<ResetOutcome> {
        self.offline_stale_nodes().await?;

        let outcome = self
            .jobs
            .reclaim_stale_jobs(self.config.job_timeout_hours)
            .await?;

        if outcome.requeued > 0 || outcome.failed > 0 {
            info!(
                "Reclaimed stale jobs: {} requeued, {} failed",
                outcome.requeued, outcome.failed
            );
        }

        *self.last_outcome.lock().await = outcome;
        Ok(outcome)
    }

    async fn offline_stale_nodes(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.heartbeat_timeout_seconds);

        for node in self.nodes.list().await? {
            if node.status == NodeStatus::Offline {
                continue;
            }

            // A node that never heartbeated is judged by its registration time.
            let stale = match node.last_heartbeat {
                Some(hb) => hb < cutoff,
                None => node.created_at < cutoff,
            };
            if !stale {
                continue;
            }

            warn!("Node {} ({}) missed heartbeats, marking offline", node.name, node.id);
            let held_job = self.nodes.mark_offline(&node.id).await?;

            if let Some(job_id) = held_job {
                self.release_orphaned_job(job_id, &node.id).await?;
            }
        }

        Ok(())
    }

    /// Release a job held by a node that just went offline: requeue if
    /// attempts remain, terminally fail otherwise. Attempts are never
    /// touched here.
    async fn release_orphaned_job(&self, job_id: i64, node_id: &str) -> Result<()> {
        let Some(job) = self.jobs.get_by_id(job_id).await? else {
            return Ok(());
        };

        if job.status != JobStatus::Running || job.assigned_node_id.as_deref() != Some(node_id) {
            return Ok(());
        }

        if job.has_attempts_remaining() {
            info!("Releasing job {} from offline node {}", job_id, node_id);
            self.jobs.unclaim_job(job_id).await?;
        } else {
            warn!("Job {} exhausted its attempts on offline node {}", job_id, node_id);
            self.jobs
                .mark_failed(job_id, "Max attempts exceeded", false)
                .await?;
            self.episodes
                .update_status(job.episode_id, EpisodeStatus::Failed, Some("Max attempts exceeded"))
                .await?;
        }

        Ok(())
    }

    pub async fn get_status(&self) -> Result<CoordinatorStatus> {
        let nodes = self.nodes.list().await?;
        let outcome = *self.last_outcome.lock().await;

        Ok(CoordinatorStatus {
            nodes_online: nodes.iter().filter(|n| n.status != NodeStatus::Offline).count(),
            nodes_offline: nodes.iter().filter(|n| n.status == NodeStatus::Offline).count(),
            last_requeued: outcome.requeued,
            last_failed: outcome.failed,
        })
    }
}
