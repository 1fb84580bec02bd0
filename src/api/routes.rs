use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::AuthError;
use crate::engine::Selection;
use crate::models::StatusSnapshot;
use crate::session::{ReportView, SessionError, SessionManager, WorkerCommand};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

/// Create the operator API router. The excluded dashboard UI is its only
/// intended client; every command returns synchronously and effects are
/// observed via status polling.
pub fn create_router(sessions: Arc<SessionManager>) -> Router {
    let state = AppState { sessions };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/session/:user/connect", post(connect))
        .route("/api/session/:user/start", post(start))
        .route("/api/session/:user/stop", post(stop))
        .route("/api/session/:user/selection", post(select_bet_type))
        .route("/api/session/:user/stake", post(update_stake))
        .route("/api/session/:user/status", get(get_status))
        .route("/api/session/:user/report", get(get_report))
        .route("/api/session/:user/report/reset", post(reset_report))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Authenticate and bring up the automation unit for one user.
async fn connect(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    if req.base_stake <= 0.0 {
        return Err(ApiError::BadRequest("base_stake must be positive".into()));
    }
    state
        .sessions
        .connect(&user, &req.source_credential, req.base_stake)
        .await?;
    Ok(Json(OkResponse::ok()))
}

/// Begin (or restart after mission completion) automatic betting.
async fn start(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.sessions.command(&user, WorkerCommand::Start)?;
    Ok(Json(OkResponse::ok()))
}

/// Stop betting and close the connection; ledger stays inspectable.
async fn stop(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.sessions.stop(&user)?;
    Ok(Json(OkResponse::ok()))
}

async fn select_bet_type(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    state
        .sessions
        .command(&user, WorkerCommand::Select(req.selection))?;
    Ok(Json(OkResponse::ok()))
}

/// Request a base-stake change; takes effect at the next level 0.
async fn update_stake(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<StakeRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    if req.amount <= 0.0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    state
        .sessions
        .command(&user, WorkerCommand::UpdateStake(req.amount))?;
    Ok(Json(OkResponse::ok()))
}

async fn get_status(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    Ok(Json(state.sessions.status(&user)?))
}

async fn get_report(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<ReportView>, ApiError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    Ok(Json(state.sessions.report(&user, limit)?))
}

async fn reset_report(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.sessions.command(&user, WorkerCommand::ResetReport)?;
    Ok(Json(OkResponse::ok()))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct ConnectRequest {
    source_credential: String,
    base_stake: f64,
}

#[derive(Deserialize)]
struct SelectionRequest {
    selection: Selection,
}

#[derive(Deserialize)]
struct StakeRequest {
    amount: f64,
}

#[derive(Deserialize)]
struct ReportQuery {
    /// Limit number of history entries
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

impl OkResponse {
    fn ok() -> Self {
        Self { ok: true }
    }
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    NotFound,
    Busy,
    BadRequest(String),
    Auth(AuthError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => ApiError::NotFound,
            SessionError::Busy => ApiError::Busy,
            SessionError::Auth(e) => ApiError::Auth(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "no session for user".to_string()),
            ApiError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "session busy, retry shortly".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Auth(err) => {
                let status = match err {
                    AuthError::BalanceInsufficient(_) => StatusCode::PAYMENT_REQUIRED,
                    AuthError::Rejected(_) | AuthError::AttemptsExhausted { .. } => {
                        StatusCode::UNAUTHORIZED
                    }
                    AuthError::NotFound => StatusCode::NOT_FOUND,
                    AuthError::Timeout | AuthError::Transport(_) => StatusCode::BAD_GATEWAY,
                };
                (status, err.to_string())
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_conversion() {
        let api_err: ApiError = SessionError::NotFound.into();
        assert!(matches!(api_err, ApiError::NotFound));

        let api_err: ApiError =
            SessionError::Auth(AuthError::BalanceInsufficient("low".into())).into();
        assert!(matches!(api_err, ApiError::Auth(_)));
    }

    #[test]
    fn test_selection_request_parses_wire_names() {
        let req: SelectionRequest = serde_json::from_str(r#"{"selection":"red"}"#).unwrap();
        assert_eq!(req.selection, Selection::Red);
        let req: SelectionRequest = serde_json::from_str(r#"{"selection":"high"}"#).unwrap();
        assert_eq!(req.selection, Selection::High);
    }
}
