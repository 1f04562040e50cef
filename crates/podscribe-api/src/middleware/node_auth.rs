//! Node bearer-token authentication.
//!
//! Every mutating node endpoint except `register` requires the
//! `X-Transcriber-Key` header minted at registration. Any authenticated
//! call doubles as a liveness signal, so the node's heartbeat is bumped
//! here as a side effect.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use podscribe_core::WorkerNode;

use crate::state::AppState;

pub const NODE_KEY_HEADER: &str = "X-Transcriber-Key";

/// Authenticated node, added to request extensions
#[derive(Clone)]
pub struct AuthedNode(pub WorkerNode);

pub async fn node_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let api_key = request
        .headers()
        .get(NODE_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    let Some(api_key) = api_key else {
        tracing::debug!("Node auth: missing {} header", NODE_KEY_HEADER);
        return Err(StatusCode::UNAUTHORIZED);
    };

    let node = match state.nodes.get_by_api_key(api_key).await {
        Ok(Some(node)) => node,
        Ok(None) => {
            tracing::warn!("Node auth: invalid API key");
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => {
            tracing::error!("Node auth: database error: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if let Err(e) = state.nodes.update_heartbeat(&node.id, None, None).await {
        tracing::debug!("Node auth: heartbeat bump failed: {}", e);
    }

    request.extensions_mut().insert(AuthedNode(node));
    Ok(next.run(request).await)
}
