use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one independent scheduling domain: a project plus one of its
/// worktrees. `branch_name == None` is the project's primary worktree.
///
/// Keys order by project path first so registry walks are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopKey {
    pub project_path: String,
    pub branch_name: Option<String>,
}

impl LoopKey {
    /// Build a key, folding a blank branch name into `None`.
    pub fn new(project_path: impl Into<String>, branch_name: Option<String>) -> Self {
        Self {
            project_path: project_path.into(),
            branch_name: normalize_branch(branch_name),
        }
    }

    pub fn primary(project_path: impl Into<String>) -> Self {
        Self::new(project_path, None)
    }
}

impl fmt::Display for LoopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch_name {
            Some(branch) => write!(f, "{}@{}", self.project_path, branch),
            None => f.write_str(&self.project_path),
        }
    }
}

/// Absent, `null` and blank branch names all mean the primary worktree.
pub fn normalize_branch(branch_name: Option<String>) -> Option<String> {
    branch_name
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
}

/// Result of a `start` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    /// The loop was already running; nothing changed.
    pub already_running: bool,
    /// Concurrency ceiling in effect after the call.
    pub max_concurrency: usize,
}

/// Result of a `stop` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    pub was_running: bool,
    /// Features still finishing. They complete normally; nothing new starts.
    pub running_features_count: usize,
}

/// Snapshot of a single loop key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub is_auto_loop_running: bool,
    /// Feature ids in dispatch order.
    pub running_features: Vec<String>,
    pub running_count: usize,
    pub max_concurrency: usize,
}

/// A worktree with an active auto-loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeRef {
    pub project_path: String,
    pub branch_name: Option<String>,
}

impl From<&LoopKey> for WorktreeRef {
    fn from(key: &LoopKey) -> Self {
        Self {
            project_path: key.project_path.clone(),
            branch_name: key.branch_name.clone(),
        }
    }
}

/// Aggregate across every loop key known to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatus {
    /// At least one loop is running.
    pub is_running: bool,
    pub running_features: Vec<String>,
    pub running_count: usize,
    /// Number of loops currently running.
    pub active_loops: usize,
}
