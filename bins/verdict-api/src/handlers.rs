// HTTP route handlers for the Verdict API

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use verdict_common::{Language, Mode, ResultSummary, SubmissionId};
use verdict_core::{
    CatalogError, EvaluationOutcome, EvaluationState, FailureReason, ProblemCatalog,
    SubmissionDraft,
};

use crate::metrics;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub language: String,
    pub source_code: String,
    pub problem_id: String,
    /// Loaded from the problem catalog when absent
    #[serde(default)]
    pub stdin: Option<Vec<String>>,
    #[serde(default)]
    pub expected_outputs: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: EvaluationOutcome,
    pub summary: ResultSummary,
}

impl EvaluateResponse {
    pub fn new(session_id: String, outcome: EvaluationOutcome) -> Self {
        let summary = outcome
            .result
            .as_ref()
            .map(|result| result.summary())
            .unwrap_or_default();
        Self {
            session_id,
            outcome,
            summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub name: Language,
    pub display_name: &'static str,
    pub judge_id: u32,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Explicit session header, else one session per user
fn session_key(headers: &HeaderMap) -> Option<String> {
    header_value(headers, SESSION_ID_HEADER).or_else(|| header_value(headers, USER_ID_HEADER))
}

/// POST /run - Evaluate code against test data without recording it
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EvaluateRequest>,
) -> Response {
    evaluate(state, headers, payload, Mode::Run).await
}

/// POST /submit - Evaluate code and record the submission
pub async fn submit_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EvaluateRequest>,
) -> Response {
    evaluate(state, headers, payload, Mode::Submit).await
}

async fn evaluate(
    state: Arc<AppState>,
    headers: HeaderMap,
    payload: EvaluateRequest,
    mode: Mode,
) -> Response {
    let user_id = header_value(&headers, USER_ID_HEADER);
    if mode == Mode::Submit && user_id.is_none() {
        metrics::record_rejected("missing_user");
        return error_response(StatusCode::BAD_REQUEST, "x-user-id header is required");
    }

    let draft = match build_draft(state.catalog.as_ref(), payload).await {
        Ok(draft) => draft,
        Err(response) => return response,
    };

    // Anonymous requests get a session that is unregistered when the request ends
    let (session, _transient) = match session_key(&headers) {
        Some(key) => (state.sessions.get_or_create(&key), None),
        None => {
            let transient = state.sessions.transient();
            (transient.session().clone(), Some(transient))
        }
    };
    let session_id = session.id().to_string();

    let started = match user_id {
        Some(user_id) if mode == Mode::Submit => {
            state.orchestrator.submit_code(&session, draft, user_id)
        }
        _ => state.orchestrator.run_code(&session, draft),
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            warn!(session_id = %session_id, mode = %mode, "Evaluation already in progress");
            metrics::record_rejected("in_progress");
            return error_response(StatusCode::CONFLICT, e.to_string());
        }
    };

    metrics::record_started(mode);
    let started_at = Instant::now();

    // Dropping this future (client went away) cancels the evaluation
    let guard = handle.cancellation_token().drop_guard();
    let outcome = handle.outcome().await;
    guard.disarm();

    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
    metrics::record_finished(mode, &outcome, elapsed_ms);
    info!(
        session_id = %session_id,
        mode = %mode,
        status = metrics::outcome_label(&outcome),
        elapsed_ms,
        "Evaluation finished"
    );

    let status = match &outcome.state {
        EvaluationState::Failed {
            reason: FailureReason::Construction(_),
            ..
        } => {
            metrics::record_rejected("invalid_request");
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::OK,
    };

    (status, Json(EvaluateResponse::new(session_id, outcome))).into_response()
}

async fn build_draft(
    catalog: &dyn ProblemCatalog,
    payload: EvaluateRequest,
) -> Result<SubmissionDraft, Response> {
    let EvaluateRequest {
        language,
        source_code,
        problem_id,
        stdin,
        expected_outputs,
    } = payload;

    let (stdin, expected_outputs) = match (stdin, expected_outputs) {
        (Some(stdin), Some(expected)) => (stdin, expected),
        (None, None) => {
            let data = catalog.test_data(&problem_id).await.map_err(|e| {
                metrics::record_rejected("unknown_problem");
                match e {
                    CatalogError::NotFound(_) => error_response(StatusCode::NOT_FOUND, e.to_string()),
                    other => {
                        error!(problem_id = %problem_id, error = %other, "Problem catalog lookup failed");
                        error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
                    }
                }
            })?;
            (data.stdin(), data.expected_outputs())
        }
        _ => {
            metrics::record_rejected("invalid_request");
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "stdin and expected_outputs must be supplied together",
            ));
        }
    };

    Ok(SubmissionDraft {
        source_code,
        language,
        stdin,
        expected_outputs,
        problem_ref: problem_id,
    })
}

/// GET /sessions/:id/state - Current evaluation state of a session
pub async fn session_state(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get(&session_id) {
        Some(session) => (StatusCode::OK, Json(session.state())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Session not found"),
    }
}

/// DELETE /sessions/:id/evaluation - Cancel the in-flight evaluation
pub async fn cancel_evaluation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.sessions.get(&session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    };

    if session.cancel() {
        info!(session_id = %session_id, "Evaluation cancellation requested");
        metrics::record_cancelled("api");
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "session_id": session_id,
                "cancelled": true
            })),
        )
            .into_response()
    } else {
        error_response(StatusCode::CONFLICT, "No evaluation in progress")
    }
}

/// GET /problems/:id/submissions - Submission history of the calling user
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(problem_id): Path<String>,
) -> Response {
    let Some(user_id) = header_value(&headers, USER_ID_HEADER) else {
        return error_response(StatusCode::BAD_REQUEST, "x-user-id header is required");
    };

    match state.store.list_for(&problem_id, &user_id).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            error!(problem_id = %problem_id, user_id = %user_id, error = %e, "Failed to list submissions");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /submissions/:id - One recorded submission
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Response {
    let Ok(id) = submission_id.parse::<SubmissionId>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid submission ID format");
    };

    match state.store.get(&id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Submission not found"),
        Err(e) => {
            error!(submission_id = %id, error = %e, "Failed to fetch submission");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /languages - Languages accepted by the evaluator
pub async fn list_languages() -> Json<Vec<LanguageInfo>> {
    Json(
        Language::all_variants()
            .iter()
            .map(|&language| LanguageInfo {
                name: language,
                display_name: language.display_name(),
                judge_id: language.judge_id(),
            })
            .collect(),
    )
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "sessions": state.sessions.len()
        })),
    )
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler() -> Response {
    match metrics::render_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
