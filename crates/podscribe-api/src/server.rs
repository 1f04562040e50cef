//! Router assembly and server bootstrap.

use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use podscribe_core::download::HttpAudioFetcher;
use podscribe_core::notify::{NoopNotifier, Notifier, WebhookNotifier};
use podscribe_core::transcription::command::CommandEngine;
use podscribe_core::transcription::{SpeechToText, TranscriptionService};
use podscribe_core::{Config, Database, Error, Result};

use crate::middleware::node_auth_middleware;
use crate::routes::{feeds, nodes, queue};
use crate::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

pub fn build_router(state: AppState) -> Router {
    let node_protected = Router::new()
        .route("/api/nodes/:id/heartbeat", post(nodes::heartbeat))
        .route("/api/nodes/:id/claim", post(nodes::claim))
        .route("/api/nodes/jobs/:job_id/audio", get(nodes::fetch_audio))
        .route("/api/nodes/jobs/:job_id/progress", post(nodes::progress))
        .route("/api/nodes/jobs/:job_id/complete", post(nodes::complete))
        .route("/api/nodes/jobs/:job_id/fail", post(nodes::fail))
        .route("/api/nodes/jobs/:job_id/release", post(nodes::release))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            node_auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/nodes/register", post(nodes::register))
        .merge(node_protected)
        .route("/api/queue", get(queue::list_queue))
        .route("/api/queue/status", get(queue::queue_status))
        .route("/api/queue/episodes/:id/download", post(queue::queue_download))
        .route("/api/queue/episodes/:id/transcribe", post(queue::queue_transcribe))
        .route("/api/queue/episodes/:id/process", post(queue::queue_process))
        .route("/api/queue/:job_id/retry", post(queue::retry_job))
        .route("/api/queue/:job_id", delete(queue::cancel_job).get(queue::get_job))
        .route("/api/feeds", post(feeds::add_feed).get(feeds::list_feeds))
        .route("/api/feeds/:id", delete(feeds::delete_feed))
        .route("/api/feeds/:id/poll", post(feeds::poll_feed))
        .route("/api/feeds/:id/episodes", get(feeds::list_episodes))
        .route("/api/episodes/:id", get(feeds::get_episode))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Full startup sequence: directories, store + migrations, orphaned-job
/// recovery, background tasks, then the HTTP listener.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    config.ensure_directories()?;

    let db = Database::open(&config.database.path).await?;

    let fetcher = Arc::new(HttpAudioFetcher::new(
        &config.poller.user_agent,
        config.workers.request_timeout_seconds,
    )?);

    let engine_config = config.transcription.clone();
    let transcription = Arc::new(TranscriptionService::new(move || {
        let command = engine_config
            .command
            .as_deref()
            .ok_or_else(|| Error::config("transcription.command is not set"))?;
        let engine = CommandEngine::from_command_line(command, &engine_config.model)?;
        Ok(Arc::new(engine) as Arc<dyn SpeechToText>)
    }));

    let notifier: Arc<dyn Notifier> =
        match (config.notifications.enabled, config.notifications.url.as_deref()) {
            (true, Some(url)) => Arc::new(WebhookNotifier::new(url)),
            _ => Arc::new(NoopNotifier),
        };

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let state = AppState::new(config, db.clone(), fetcher, transcription, notifier)?;

    // Startup recovery happens inside the manager before workers spawn
    state.worker_manager.clone().start().await?;

    let coordinator_handle = match &state.coordinator {
        Some(coordinator) => Some(coordinator.clone().start().await),
        None => None,
    };
    let poller_handle = state.poller.clone().start().await;

    let app = build_router(state.clone());

    info!("podscribe API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::network(e.to_string()))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::network(e.to_string()))?;

    info!("Shutting down...");
    state.poller.stop().await;
    poller_handle.abort();

    if let Some(coordinator) = &state.coordinator {
        coordinator.stop().await;
    }
    if let Some(handle) = coordinator_handle {
        handle.abort();
    }

    state.worker_manager.stop(Duration::from_secs(30)).await;
    db.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
