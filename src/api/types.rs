//! Request and response bodies for the HTTP API.
//!
//! All bodies are camelCase JSON. Every response carries `success`; failures
//! are `{ "success": false, "error": "..." }`.

use serde::{Deserialize, Serialize};

use crate::models::*;

// ============================================================
// Auto-mode
// ============================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub project_path: Option<String>,
    pub branch_name: Option<String>,
    /// Accepts any JSON number; see `resolve_max_concurrency`.
    pub max_concurrency: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub project_path: Option<String>,
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub project_path: Option<String>,
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_features_count: Option<usize>,
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusResponse {
    pub success: bool,
    /// Features of this key are executing right now, whether or not the loop
    /// is still dispatching.
    pub is_running: bool,
    #[serde(flatten)]
    pub status: ProjectStatus,
    pub project_path: String,
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: GlobalStatus,
    pub active_auto_loop_projects: Vec<String>,
    pub active_auto_loop_worktrees: Vec<WorktreeRef>,
}

// ============================================================
// Features
// ============================================================

/// `?projectPath=` on feature routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectQuery {
    pub project_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeatureRequest {
    pub project_path: Option<String>,
    #[serde(flatten)]
    pub feature: CreateFeatureInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureResponse {
    pub success: bool,
    pub feature: Feature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureListResponse {
    pub success: bool,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclesResponse {
    pub success: bool,
    pub cycles: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectListResponse {
    pub success: bool,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Turn a client-supplied ceiling into a usable one. Non-finite values and
/// values below 1 are treated as absent; fractions are truncated.
pub fn resolve_max_concurrency(value: Option<f64>) -> Option<usize> {
    match value {
        Some(v) if v.is_finite() && v >= 1.0 => Some(v.trunc() as usize),
        _ => None,
    }
}
