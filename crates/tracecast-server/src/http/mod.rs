//! HTTP surface.

pub mod investigations;
pub mod stream;

use axum::Router;
use axum::routing::{get, post, put};

use crate::server::AppState;

/// Investigation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/investigations",
            post(investigations::create).get(investigations::list),
        )
        .route(
            "/investigations/{id}",
            get(investigations::get).delete(investigations::delete),
        )
        .route("/investigations/{id}/status", put(investigations::update_status))
        .route("/investigations/{id}/chat", get(investigations::chat_history))
        .route("/investigations/{id}/message", post(investigations::post_message))
        .route("/investigations/{id}/events", post(investigations::ingest_events))
        .route("/investigations/{id}/stream", get(stream::stream))
}
