use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::cascade::{CacheQueue, request_scope};

/// Runs the handler inside its own request scope, then the engine's
/// end-of-request hook.
///
/// The buffered cascade is persisted after the response is produced, so queue
/// writes never add store latency to the handler itself.
pub async fn flush_queue_writes(
    State(queue): State<Arc<CacheQueue>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    request_scope(async move {
        let response = next.run(request).await;
        if queue.finish_request().await {
            debug!(path = %path, status = response.status().as_u16(), "Queue write persisted");
        }
        response
    })
    .await
}
