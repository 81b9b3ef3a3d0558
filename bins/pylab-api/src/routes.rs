use crate::handlers;
use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/api/categories", get(handlers::list_categories))
        .route("/api/exercise/:exercise_id", get(handlers::get_exercise))
        .route("/api/run", post(handlers::run_code))
        .route("/admin/reload", post(handlers::reload_exercises))
}
