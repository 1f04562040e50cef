use std::sync::Arc;

use podscribe_core::config::Config;
use podscribe_core::download::AudioFetcher;
use podscribe_core::feed::FeedPoller;
use podscribe_core::jobs::{DistributedCoordinator, WorkerContext, WorkerManager};
use podscribe_core::notify::Notifier;
use podscribe_core::storage::Storage;
use podscribe_core::transcription::TranscriptionService;
use podscribe_core::{
    Database, EpisodeRepository, FeedRepository, JobRepository, NodeRepository, Result,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub feeds: FeedRepository,
    pub episodes: EpisodeRepository,
    pub jobs: JobRepository,
    pub nodes: NodeRepository,
    pub storage: Storage,
    pub worker_manager: Arc<WorkerManager>,
    pub coordinator: Option<Arc<DistributedCoordinator>>,
    pub poller: Arc<FeedPoller>,
}

impl AppState {
    /// Wire repositories, workers, and the poller over an open store.
    /// Background tasks are constructed but not started.
    pub fn new(
        config: Config,
        db: Database,
        fetcher: Arc<dyn AudioFetcher>,
        transcription: Arc<TranscriptionService>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let feeds = FeedRepository::new(db.clone());
        let episodes = EpisodeRepository::new(db.clone());
        let jobs = JobRepository::new(db.clone());
        let nodes = NodeRepository::new(db.clone());
        let storage = Storage::new(config.storage.path.clone(), config.storage.temp_path.clone());

        let worker_manager = Arc::new(WorkerManager::new(WorkerContext {
            jobs: jobs.clone(),
            episodes: episodes.clone(),
            feeds: feeds.clone(),
            storage: storage.clone(),
            fetcher,
            transcription,
            notifier,
            config: config.workers.clone(),
            distributed_enabled: config.distributed.enabled,
        }));

        let coordinator = if config.distributed.enabled {
            Some(Arc::new(DistributedCoordinator::new(
                jobs.clone(),
                nodes.clone(),
                episodes.clone(),
                config.distributed.clone(),
            )))
        } else {
            None
        };

        let poller = Arc::new(FeedPoller::new(
            feeds.clone(),
            episodes.clone(),
            jobs.clone(),
            config.poller.clone(),
            config.workers.max_retry_attempts,
        )?);

        Ok(Self {
            config: Arc::new(config),
            db,
            feeds,
            episodes,
            jobs,
            nodes,
            storage,
            worker_manager,
            coordinator,
            poller,
        })
    }
}
