use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use super::types::*;
use super::AppState;
use crate::error::SchedulerError;
use crate::graph::FeatureGraph;
use crate::models::*;

// ============================================================
// Error Handling
// ============================================================

/// Failure of a route, rendered as `{ "success": false, "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    TooManyRequests(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (
            status,
            Json(ErrorResponse {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::InvalidArgument(msg) => Self::BadRequest(msg),
            SchedulerError::Internal(msg) => internal_error(msg),
        }
    }
}

/// Log an internal error and return a sanitized response to the client.
/// The full error is logged server-side, clients only see a generic message.
///
/// Store validation errors (missing fields, duplicate ids) are safe to expose
/// and come back as BAD_REQUEST.
fn internal_error(e: impl std::fmt::Display) -> ApiError {
    let msg = e.to_string();

    if msg.contains("required") || msg.contains("already exists") {
        tracing::warn!("Validation error: {}", msg);
        return ApiError::BadRequest(msg);
    }

    tracing::error!("Internal error: {}", msg);
    ApiError::Internal("Internal server error".to_string())
}

/// Decode an optional JSON body. An empty body is the type's default.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

fn require_project_path(project_path: Option<String>) -> Result<String, ApiError> {
    project_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("projectPath is required".to_string()))
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Auto-mode
// ============================================================

pub async fn start_auto_mode(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StartResponse>, ApiError> {
    let req: StartRequest = parse_body(&body)?;
    let project_path = require_project_path(req.project_path)?;
    let branch_name = normalize_branch(req.branch_name);
    let max_concurrency = resolve_max_concurrency(req.max_concurrency);

    let outcome =
        state
            .scheduler
            .start(&project_path, branch_name.as_deref(), max_concurrency)?;

    if outcome.already_running {
        return Ok(Json(StartResponse {
            success: true,
            already_running: Some(true),
            message: None,
            branch_name,
        }));
    }

    let worktree = match &branch_name {
        Some(branch) => format!("worktree {}", branch),
        None => "main worktree".to_string(),
    };
    Ok(Json(StartResponse {
        success: true,
        already_running: None,
        message: Some(format!(
            "Auto mode started for {} with max {} concurrent features",
            worktree, outcome.max_concurrency
        )),
        branch_name,
    }))
}

pub async fn stop_auto_mode(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StopResponse>, ApiError> {
    let req: StopRequest = parse_body(&body)?;
    let project_path = require_project_path(req.project_path)?;
    let branch_name = normalize_branch(req.branch_name);

    let outcome = state.scheduler.stop(&project_path, branch_name.as_deref())?;

    Ok(Json(if outcome.was_running {
        StopResponse {
            success: true,
            was_running: None,
            running_features_count: Some(outcome.running_features_count),
            branch_name,
        }
    } else {
        StopResponse {
            success: true,
            was_running: Some(false),
            running_features_count: None,
            branch_name,
        }
    }))
}

/// Per-key status when `projectPath` is given, otherwise the global aggregate.
pub async fn auto_mode_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: StatusRequest = parse_body(&body)?;
    let branch_name = normalize_branch(req.branch_name);

    match req.project_path.filter(|p| !p.trim().is_empty()) {
        Some(project_path) => {
            let status = state
                .scheduler
                .status_for_project(&project_path, branch_name.as_deref());
            Ok(Json(ProjectStatusResponse {
                success: true,
                is_running: status.running_count > 0,
                status,
                project_path,
                branch_name,
            })
            .into_response())
        }
        None => Ok(Json(GlobalStatusResponse {
            success: true,
            status: state.scheduler.global_status(),
            active_auto_loop_projects: state.scheduler.active_auto_loop_projects(),
            active_auto_loop_worktrees: state.scheduler.active_auto_loop_worktrees(),
        })
        .into_response()),
    }
}

// ============================================================
// Projects
// ============================================================

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let projects = state.db.list_projects().map_err(internal_error)?;
    Ok(Json(ProjectListResponse {
        success: true,
        projects,
    }))
}

// ============================================================
// Features
// ============================================================

pub async fn list_features(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<FeatureListResponse>, ApiError> {
    let project_path = require_project_path(query.project_path)?;
    let features = state
        .db
        .get_features_by_project(&project_path)
        .map_err(internal_error)?;
    Ok(Json(FeatureListResponse {
        success: true,
        features,
    }))
}

pub async fn create_feature(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<FeatureResponse>), ApiError> {
    let req: CreateFeatureRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    let project_path = require_project_path(req.project_path)?;

    let feature = state
        .db
        .create_feature(&project_path, req.feature)
        .map_err(internal_error)?;
    state.scheduler.notify_features_changed(&project_path);

    Ok((
        StatusCode::CREATED,
        Json(FeatureResponse {
            success: true,
            feature,
        }),
    ))
}

pub async fn get_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<FeatureResponse>, ApiError> {
    let project_path = require_project_path(query.project_path)?;
    state
        .db
        .get_feature(&project_path, &id)
        .map_err(internal_error)?
        .map(|feature| {
            Json(FeatureResponse {
                success: true,
                feature,
            })
        })
        .ok_or_else(|| ApiError::NotFound("Feature not found".to_string()))
}

pub async fn update_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
    body: Bytes,
) -> Result<Json<FeatureResponse>, ApiError> {
    let project_path = require_project_path(query.project_path)?;
    let input: UpdateFeatureInput = parse_body(&body)?;

    let feature = state
        .db
        .update_feature(&project_path, &id, input)
        .map_err(internal_error)?
        .ok_or_else(|| ApiError::NotFound("Feature not found".to_string()))?;
    state.scheduler.notify_features_changed(&project_path);

    Ok(Json(FeatureResponse {
        success: true,
        feature,
    }))
}

pub async fn delete_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let project_path = require_project_path(query.project_path)?;
    if !state
        .db
        .delete_feature(&project_path, &id)
        .map_err(internal_error)?
    {
        return Err(ApiError::NotFound("Feature not found".to_string()));
    }
    state.scheduler.notify_features_changed(&project_path);
    Ok(Json(SuccessResponse { success: true }))
}

/// Advisory report of dependency cycles. Cyclic features stay in the backlog
/// forever; this only makes them visible.
pub async fn feature_cycles(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<CyclesResponse>, ApiError> {
    let project_path = require_project_path(query.project_path)?;
    let features = state
        .db
        .get_features_by_project(&project_path)
        .map_err(internal_error)?;
    let cycles = FeatureGraph::build(&features).find_cycles();
    Ok(Json(CyclesResponse {
        success: true,
        cycles,
    }))
}
