//! Request types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartAutoModeRequest {
    #[schemars(description = "Absolute path of the project to run features for")]
    pub project_path: String,
    #[schemars(
        description = "Worktree branch to scope the loop to. Omit for the main worktree."
    )]
    #[serde(default)]
    pub branch_name: Option<String>,
    #[schemars(
        description = "Maximum number of features executing at once. Omit to use the server default."
    )]
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StopAutoModeRequest {
    #[schemars(description = "Absolute path of the project")]
    pub project_path: String,
    #[schemars(description = "Worktree branch of the loop to stop. Omit for the main worktree.")]
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AutoModeStatusRequest {
    #[schemars(
        description = "Project to report on. Omit for a summary across every project and worktree."
    )]
    #[serde(default)]
    pub project_path: Option<String>,
    #[schemars(description = "Worktree branch. Only used together with project_path.")]
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFeaturesRequest {
    #[schemars(description = "Absolute path of the project")]
    pub project_path: String,
    #[schemars(
        description = "Only return features with this status: backlog, in_progress, waiting_approval, verified, failed"
    )]
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFeatureRequest {
    #[schemars(description = "Absolute path of the project")]
    pub project_path: String,
    #[schemars(description = "Short title describing the feature")]
    pub title: String,
    #[schemars(description = "What the agent should build")]
    #[serde(default)]
    pub description: Option<String>,
    #[schemars(description = "Ids of features that must be finished before this one starts")]
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[schemars(description = "Lower runs first. Defaults to 2.")]
    #[serde(default)]
    pub priority: Option<i64>,
    #[schemars(description = "Worktree branch this feature belongs to. Omit for the main worktree.")]
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateFeatureStatusRequest {
    #[schemars(description = "Absolute path of the project")]
    pub project_path: String,
    #[schemars(description = "Id of the feature to update")]
    pub feature_id: String,
    #[schemars(
        description = "New status: backlog, in_progress, waiting_approval, verified, failed"
    )]
    pub status: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindCyclesRequest {
    #[schemars(description = "Absolute path of the project")]
    pub project_path: String,
}
