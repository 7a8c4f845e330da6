use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;
use crate::handlers;

pub fn get_routes() -> Router<AppState> {
    Router::new()
        .route("/start-challenge", post(handlers::start_challenge))
        .route("/end-challenge", post(handlers::end_challenge))
        .route("/task-status/{task_id}", get(handlers::task_status))
        .route("/queue-status", get(handlers::queue_status))
        .route("/list-challenge-pods", get(handlers::list_challenge_pods))
        .route("/get-pod-status", get(handlers::get_pod_status))
        .route("/get-secret", post(handlers::get_secret))
        .route("/schema", get(handlers::get_schema))
        .route("/challenge-types", get(handlers::challenge_types))
        .route("/workers", get(handlers::list_workers))
        .route("/workers/{worker_id}/pause", post(handlers::pause_worker))
        .route("/workers/{worker_id}/resume", post(handlers::resume_worker))
        .route("/workers/{worker_id}/stop", post(handlers::stop_worker))
        .route("/performance-metrics", get(handlers::performance_metrics))
        .route("/recent-deployments", get(handlers::recent_deployments))
        .route("/upload-ctd", post(handlers::upload_ctd))
}
