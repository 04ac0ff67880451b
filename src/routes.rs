use crate::{
    handlers, // Import handlers module
    AppState,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Creates the Axum router and associates routes with handlers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::list_memes))
        .route("/health", get(handlers::health))
        .route("/memes", get(handlers::list_memes))
        .route("/memes/{id}", get(handlers::get_meme))
        .route("/templates", get(handlers::list_templates))
        .route("/generate", post(handlers::generate_meme))
        .route(
            "/meme/{id}",
            get(handlers::get_meme_image).delete(handlers::delete_meme),
        )
        .route(
            "/meme/{id}/comments",
            get(handlers::list_comments).post(handlers::add_comment),
        )
        .route("/vote/{id}/{direction}", post(handlers::vote))
        .route("/api/images/{*path}", get(handlers::proxy_image))
        // Middleware Layers
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state) // Pass the application state
}
