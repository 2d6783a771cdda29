// Route definitions for the Verdict API

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(handlers::run_code))
        .route("/submit", post(handlers::submit_code))
        .route("/sessions/:id/state", get(handlers::session_state))
        .route("/sessions/:id/evaluation", delete(handlers::cancel_evaluation))
        .route("/problems/:id/submissions", get(handlers::list_submissions))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/languages", get(handlers::list_languages))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
