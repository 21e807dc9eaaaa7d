//! MCP server that lets an assistant drive auto-mode.
//!
//! The scheduler lives inside `automode serve`, so every tool is a thin call
//! through [`client::AutoModeClient`] to that process.

pub mod client;
mod types;

use std::str::FromStr;

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;

use crate::api::types::{GlobalStatusResponse, ProjectStatusResponse, StartResponse, StopResponse};
use crate::models::*;
use client::{AutoModeClient, ClientError};

impl From<ClientError> for McpError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::BadRequest(msg) | ClientError::NotFound(msg) => {
                McpError::invalid_params(msg, None)
            }
            other => McpError::internal_error(other.to_string(), None),
        }
    }
}

/// Status of one loop or of the whole server, depending on the request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AutoModeStatus {
    Project(ProjectStatusResponse),
    Global(GlobalStatusResponse),
}

#[derive(Clone)]
pub struct McpServer {
    client: AutoModeClient,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    pub fn new(client: AutoModeClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    fn parse_status(s: &str) -> Result<FeatureStatus, McpError> {
        FeatureStatus::from_str(s).map_err(|e| McpError::invalid_params(e, None))
    }

    fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    // ============================================================
    // Tool logic, shared by the tool handlers and the tests
    // ============================================================

    pub async fn call_start_auto_mode(
        &self,
        req: StartAutoModeRequest,
    ) -> Result<StartResponse, McpError> {
        Ok(self
            .client
            .start(
                &req.project_path,
                req.branch_name.as_deref(),
                req.max_concurrency,
            )
            .await?)
    }

    pub async fn call_stop_auto_mode(
        &self,
        req: StopAutoModeRequest,
    ) -> Result<StopResponse, McpError> {
        Ok(self
            .client
            .stop(&req.project_path, req.branch_name.as_deref())
            .await?)
    }

    pub async fn call_get_auto_mode_status(
        &self,
        req: AutoModeStatusRequest,
    ) -> Result<AutoModeStatus, McpError> {
        match req.project_path.filter(|p| !p.trim().is_empty()) {
            Some(project_path) => Ok(AutoModeStatus::Project(
                self.client
                    .project_status(&project_path, req.branch_name.as_deref())
                    .await?,
            )),
            None => Ok(AutoModeStatus::Global(self.client.global_status().await?)),
        }
    }

    pub async fn call_list_features(
        &self,
        req: ListFeaturesRequest,
    ) -> Result<Vec<Feature>, McpError> {
        let status = req.status.as_deref().map(Self::parse_status).transpose()?;
        let features = self.client.list_features(&req.project_path).await?;
        Ok(match status {
            Some(status) => features.into_iter().filter(|f| f.status == status).collect(),
            None => features,
        })
    }

    pub async fn call_create_feature(&self, req: CreateFeatureRequest) -> Result<Feature, McpError> {
        let input = CreateFeatureInput {
            title: req.title,
            description: req.description,
            dependencies: req.dependencies,
            priority: req.priority,
            branch_name: req.branch_name,
            ..Default::default()
        };
        Ok(self.client.create_feature(&req.project_path, input).await?)
    }

    pub async fn call_update_feature_status(
        &self,
        req: UpdateFeatureStatusRequest,
    ) -> Result<Feature, McpError> {
        let status = Self::parse_status(&req.status)?;
        let input = UpdateFeatureInput {
            status: Some(status),
            ..Default::default()
        };
        Ok(self
            .client
            .update_feature(&req.project_path, &req.feature_id, &input)
            .await?)
    }

    pub async fn call_find_dependency_cycles(
        &self,
        req: FindCyclesRequest,
    ) -> Result<Vec<Vec<String>>, McpError> {
        Ok(self.client.find_cycles(&req.project_path).await?)
    }
}

#[tool_router]
impl McpServer {
    // ============================================================
    // Auto-mode
    // ============================================================

    #[tool(
        description = "Start the auto-mode loop for a project worktree. The loop keeps picking backlog features whose dependencies are all verified, lowest priority number first, and runs up to max_concurrency of them at once. Calling it again while the loop runs changes nothing and reports alreadyRunning."
    )]
    async fn start_auto_mode(
        &self,
        params: Parameters<StartAutoModeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.call_start_auto_mode(params.0).await?;
        Self::json_result(&response)
    }

    #[tool(
        description = "Stop dispatching new features for a project worktree. Features already running finish on their own; runningFeaturesCount says how many."
    )]
    async fn stop_auto_mode(
        &self,
        params: Parameters<StopAutoModeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.call_stop_auto_mode(params.0).await?;
        Self::json_result(&response)
    }

    #[tool(
        description = "Report auto-mode status. With project_path: whether that loop is running, which features it is executing and its concurrency ceiling. Without: every running feature and every active loop on the server."
    )]
    async fn get_auto_mode_status(
        &self,
        params: Parameters<AutoModeStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.call_get_auto_mode_status(params.0).await?;
        Self::json_result(&response)
    }

    // ============================================================
    // Features
    // ============================================================

    #[tool(
        description = "List the features of a project in declaration order, optionally filtered by status."
    )]
    async fn list_features(
        &self,
        params: Parameters<ListFeaturesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let features = self.call_list_features(params.0).await?;
        Self::json_result(&features)
    }

    #[tool(
        description = "Add a feature to a project's backlog. Dependencies are feature ids that must be verified before this one is picked up. A running loop for the same worktree sees the new feature right away."
    )]
    async fn create_feature(
        &self,
        params: Parameters<CreateFeatureRequest>,
    ) -> Result<CallToolResult, McpError> {
        let feature = self.call_create_feature(params.0).await?;
        Self::json_result(&feature)
    }

    #[tool(
        description = "Set a feature's status. Use 'verified' to approve finished work and unblock dependents, or 'backlog' to send a failed feature back for another attempt."
    )]
    async fn update_feature_status(
        &self,
        params: Parameters<UpdateFeatureStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let feature = self.call_update_feature_status(params.0).await?;
        Self::json_result(&feature)
    }

    #[tool(
        description = "Find dependency cycles in a project. Features on a cycle never become ready; break the cycle by editing their dependencies."
    )]
    async fn find_dependency_cycles(
        &self,
        params: Parameters<FindCyclesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let cycles = self.call_find_dependency_cycles(params.0).await?;
        Self::json_result(&cycles)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "automode".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"automode runs coding agents over a project's feature backlog.

FEATURES:
- Each feature has an id, a status, a priority (lower runs first) and a list of dependency ids.
- Statuses: backlog -> in_progress -> waiting_approval -> verified. A run that fails ends in 'failed'.
- A feature is ready when it is in the backlog and every dependency is verified.
- Finished work waits in waiting_approval until you mark it verified; only then are its dependents unblocked.
- Dependencies on ids that do not exist are ignored.

LOOPS:
- One loop per (project_path, branch_name). Omit branch_name for the main worktree.
- A loop only picks features whose branch matches its own.
- Stopping a loop lets running features finish.

WORKFLOW:
1. create_feature for each unit of work, wiring dependencies
2. find_dependency_cycles to make sure nothing is stuck
3. start_auto_mode
4. get_auto_mode_status to watch progress
5. update_feature_status to approve (verified) or retry (backlog)"#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(client: AutoModeClient) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio against {}", client.base_url());

    let service = McpServer::new(client);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
