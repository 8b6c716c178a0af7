use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{events, generations, health, media};
use crate::infra::app_state::AppState;

/// All API routes under `/api`.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route(
            "/api/generations",
            get(generations::list_generations).post(generations::create_generation),
        )
        .route(
            "/api/generations/{id}",
            get(generations::get_generation).delete(generations::delete_generation),
        )
        .route(
            "/api/generations/{id}/iterate",
            post(generations::iterate_generation),
        )
        .route(
            "/api/portfolios/{portfolio_id}/animations",
            get(generations::list_portfolio_animations),
        )
        .route("/api/events/stream", get(events::event_stream))
        .route("/api/images/{id}", get(media::get_image))
        .route("/api/images/{id}/thumbnail", get(media::get_thumbnail))
        .route("/api/images/{id}/video", get(media::get_video))
        .with_state(state)
}
