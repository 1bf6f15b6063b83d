use crate::models::AppState;
use axum::Router;

pub mod auth_routes;
pub mod confirm_routes;
pub mod display_routes;
pub mod force_majeure_routes;
pub mod home_routes;
pub mod queue_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", confirm_routes::router())
        .nest("/api/v1", queue_routes::router())
        .nest("/api/v1", force_majeure_routes::router())
        .nest("/api/v1", display_routes::announce_router())
        .merge(display_routes::ws_router())
        .merge(home_routes::router())
        .with_state(state)
}
