use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::SharedState;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/user", post(api::create_user).delete(api::delete_user))
        .route(
            "/segment",
            post(api::create_segment).delete(api::delete_segment),
        )
        .route(
            "/user/segments",
            post(api::update_user_segments).get(api::get_user_segments),
        )
        .route("/user/report", get(api::get_user_report))
        .route("/user/report/{file_name}", get(api::download_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
