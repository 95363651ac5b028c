//! Web front end for docscribe: an upload page, a streaming generation
//! endpoint (Server-Sent Events) and a re-render endpoint.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

mod handlers;
pub mod models;
pub mod state;
mod template;
mod upload;

pub use state::AppState;

/// Uploads are capped at 100 MB.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index::index))
        .route("/generate/stream", post(handlers::stream::stream))
        .route("/render", post(handlers::render::render))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
