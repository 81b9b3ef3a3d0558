// HTTP route handlers for the pylab API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use pylab_common::exercises::{Category, ExerciseCatalog};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub code: String,
    pub exercise_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub categories: usize,
    pub exercises: usize,
}

fn not_found(exercise_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": format!("Exercise not found: {}", exercise_id)
        })),
    )
        .into_response()
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /api/categories - Every category with its exercises, hidden tests withheld
pub async fn list_categories(State(state): State<Arc<AppState>>) -> Json<Vec<Category>> {
    let catalog = state.catalog().await;
    Json(catalog.categories().iter().map(Category::public_view).collect())
}

/// GET /api/exercise/{exercise_id}
pub async fn get_exercise(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
) -> Response {
    let catalog = state.catalog().await;
    match catalog.get(&exercise_id) {
        Some(exercise) => (StatusCode::OK, Json(exercise.public_view())).into_response(),
        None => not_found(&exercise_id),
    }
}

/// POST /api/run - Grade learner code against an exercise
///
/// Always answers 200 with a `RunResult` once the exercise exists: crashes,
/// timeouts and capacity rejections are reported inside the result.
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    let catalog = state.catalog().await;
    let exercise = match catalog.get(&payload.exercise_id) {
        Some(exercise) => exercise,
        None => {
            warn!(exercise_id = %payload.exercise_id, "Run requested for unknown exercise");
            return not_found(&payload.exercise_id);
        }
    };

    let mut result = state.harness.run_exercise(exercise, &payload.code).await;
    info!(
        exercise_id = %exercise.id,
        success = result.success,
        score = result.score_percent(),
        "Submission graded"
    );

    result.redact_hidden();
    (StatusCode::OK, Json(result)).into_response()
}

/// POST /admin/reload - Rebuild the exercise catalog snapshot from disk
pub async fn reload_exercises(State(state): State<Arc<AppState>>) -> Json<ReloadResponse> {
    let exercises_dir = state.exercises_dir.clone();
    let catalog = match tokio::task::spawn_blocking(move || ExerciseCatalog::load(&exercises_dir)).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!(error = %e, "Catalog reload task failed, keeping current snapshot");
            let current = state.catalog().await;
            return Json(ReloadResponse {
                categories: current.categories().len(),
                exercises: current.len(),
            });
        }
    };

    let response = ReloadResponse {
        categories: catalog.categories().len(),
        exercises: catalog.len(),
    };
    *state.catalog.write().await = Arc::new(catalog);

    info!(
        categories = response.categories,
        exercises = response.exercises,
        "Exercise catalog reloaded"
    );
    Json(response)
}
