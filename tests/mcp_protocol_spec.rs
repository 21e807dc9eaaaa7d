//! MCP protocol integration tests.
//!
//! These tests spawn the actual `automode mcp` process and communicate via
//! JSON-RPC over stdio, with the HTTP API it bridges to served in-process on
//! an ephemeral port.
//!
//! The rmcp library uses line-delimited JSON (each message is one line):
//! ```
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}\n
//! {"jsonrpc":"2.0","id":1,"result":{...}}\n
//! ```

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use automode::api::{create_router, AppState};
use automode::db::Database;
use automode::runner::{AgentRunner, FeatureJob, RunFuture, RunnerError};
use automode::scheduler::{AutoModeScheduler, SchedulerConfig};

const PROJECT: &str = "/work/shop";

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct JsonRpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

struct HangingRunner;

impl AgentRunner for HangingRunner {
    fn run_feature(&self, _job: FeatureJob) -> Result<RunFuture, RunnerError> {
        Ok(Box::pin(std::future::pending::<Result<(), String>>()))
    }
}

/// MCP test client that spawns and communicates with the server
struct McpTestClient {
    child: Child,
    request_id: u64,
    reader: BufReader<std::process::ChildStdout>,
    /// Hosts the HTTP API for the lifetime of the test.
    _runtime: tokio::runtime::Runtime,
}

impl McpTestClient {
    /// Serve a fresh API and spawn `automode mcp` pointed at it
    fn spawn() -> Self {
        let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
        let url = runtime.block_on(async {
            let db = Database::open_memory().expect("Failed to create database");
            db.migrate().expect("Failed to migrate");
            let scheduler = AutoModeScheduler::new(
                Arc::new(db.clone()),
                Arc::new(HangingRunner),
                SchedulerConfig {
                    tick_interval: Duration::from_secs(3600),
                    ..SchedulerConfig::default()
                },
            );
            let app = create_router(AppState { db, scheduler });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("Failed to bind");
            let addr = listener.local_addr().expect("No local address");
            tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });
            format!("http://{}/api/v1", addr)
        });

        let mut child = Command::new(env!("CARGO_BIN_EXE_automode"))
            .arg("mcp")
            .env("AUTOMODE_URL", url)
            .env_remove("AUTOMODE_API_KEY")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn automode mcp");

        let stdout = child.stdout.take().expect("Failed to get stdout");
        let reader = BufReader::new(stdout);

        Self {
            child,
            request_id: 0,
            reader,
            _runtime: runtime,
        }
    }

    /// Send a message as line-delimited JSON
    fn send_message(&mut self, content: &str) {
        let stdin = self.child.stdin.as_mut().expect("Failed to get stdin");
        writeln!(stdin, "{}", content).expect("Failed to write message");
        stdin.flush().expect("Failed to flush stdin");
    }

    /// Read a message as line-delimited JSON
    fn read_message(&mut self) -> String {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .expect("Failed to read line");
        line.trim().to_string()
    }

    /// Send a JSON-RPC request and get the response
    fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
        self.request_id += 1;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id,
            method: method.to_string(),
            params,
        };

        let request_json = serde_json::to_string(&request).expect("Failed to serialize request");
        self.send_message(&request_json);

        let response_json = self.read_message();
        serde_json::from_str(&response_json).expect("Failed to parse response")
    }

    /// Send initialize request and initialized notification (required first messages)
    fn initialize(&mut self) -> JsonRpcResponse {
        let response = self.request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "test-client",
                    "version": "1.0.0"
                }
            })),
        );

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.send_message(&notification.to_string());

        response
    }

    fn list_tools(&mut self) -> JsonRpcResponse {
        self.request("tools/list", None)
    }

    fn call_tool(&mut self, name: &str, arguments: Value) -> JsonRpcResponse {
        self.request(
            "tools/call",
            Some(json!({
                "name": name,
                "arguments": arguments
            })),
        )
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// JSON payload of the first text content item of a tool result.
fn tool_json(response: &JsonRpcResponse) -> Value {
    assert!(
        response.error.is_none(),
        "Expected success, got error: {:?}",
        response.error
    );
    let text = response
        .result
        .as_ref()
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .expect("Expected text content");
    serde_json::from_str(text).expect("Expected JSON in text")
}

// ============================================================
// Protocol Tests
// ============================================================

mod protocol {
    use super::*;

    #[test]
    fn initialize_returns_server_info() {
        let mut client = McpTestClient::spawn();
        let response = client.initialize();

        assert!(response.error.is_none(), "Expected success, got error");
        let result = response.result.expect("Expected result");

        assert_eq!(result["serverInfo"]["name"], "automode");
        assert!(result.get("capabilities").is_some());
        assert!(result.get("instructions").is_some());
    }

    #[test]
    fn tools_list_returns_all_tools() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.list_tools();
        assert!(response.error.is_none(), "Expected success, got error");

        let result = response.result.expect("Expected result");
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .expect("Expected tools array");

        let mut tool_names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
            .collect();
        tool_names.sort_unstable();

        assert_eq!(
            tool_names,
            vec![
                "create_feature",
                "find_dependency_cycles",
                "get_auto_mode_status",
                "list_features",
                "start_auto_mode",
                "stop_auto_mode",
                "update_feature_status",
            ]
        );
    }

    #[test]
    fn tools_have_descriptions_and_schemas() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.list_tools();
        let result = response.result.expect("Expected result");
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .expect("Tools should be array");

        for tool in tools {
            let name = tool.get("name").and_then(|n| n.as_str()).unwrap_or("?");
            assert!(
                tool.get("description").is_some(),
                "Tool {} missing description",
                name
            );
            assert!(
                tool.get("inputSchema").is_some(),
                "Tool {} missing inputSchema",
                name
            );
        }
    }
}

// ============================================================
// Tool Call Tests
// ============================================================

mod tool_calls {
    use super::*;

    #[test]
    fn start_and_stop_auto_mode() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let started = tool_json(&client.call_tool(
            "start_auto_mode",
            json!({ "project_path": PROJECT, "max_concurrency": 2 }),
        ));
        assert_eq!(started["success"], true);
        assert_eq!(
            started["message"],
            "Auto mode started for main worktree with max 2 concurrent features"
        );

        let again = tool_json(&client.call_tool("start_auto_mode", json!({ "project_path": PROJECT })));
        assert_eq!(again["alreadyRunning"], true);

        let status = tool_json(&client.call_tool("get_auto_mode_status", json!({})));
        assert_eq!(status["activeAutoLoopProjects"], json!([PROJECT]));

        let stopped = tool_json(&client.call_tool("stop_auto_mode", json!({ "project_path": PROJECT })));
        assert_eq!(stopped["runningFeaturesCount"], 0);
    }

    #[test]
    fn create_update_and_list_features() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let feature = tool_json(&client.call_tool(
            "create_feature",
            json!({ "project_path": PROJECT, "title": "Checkout", "priority": 1 }),
        ));
        assert_eq!(feature["status"], "backlog");
        let feature_id = feature["id"].as_str().expect("Expected id").to_string();

        let updated = tool_json(&client.call_tool(
            "update_feature_status",
            json!({ "project_path": PROJECT, "feature_id": feature_id, "status": "verified" }),
        ));
        assert_eq!(updated["status"], "verified");

        let listed = tool_json(&client.call_tool(
            "list_features",
            json!({ "project_path": PROJECT, "status": "verified" }),
        ));
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn find_dependency_cycles_on_a_chain_is_empty() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let a = tool_json(&client.call_tool(
            "create_feature",
            json!({ "project_path": PROJECT, "title": "A" }),
        ));
        client.call_tool(
            "create_feature",
            json!({ "project_path": PROJECT, "title": "B", "dependencies": [a["id"]] }),
        );

        let cycles = tool_json(&client.call_tool(
            "find_dependency_cycles",
            json!({ "project_path": PROJECT }),
        ));
        assert_eq!(cycles, json!([]));
    }

    #[test]
    fn invalid_status_is_an_error() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.call_tool(
            "update_feature_status",
            json!({ "project_path": PROJECT, "feature_id": "x", "status": "shipped" }),
        );

        assert!(response.error.is_some(), "Expected error for invalid status");
    }

    #[test]
    fn missing_required_arguments_is_an_error() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.call_tool("start_auto_mode", json!({}));

        assert!(response.error.is_some(), "Expected error for missing project_path");
    }
}
