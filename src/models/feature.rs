use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority assigned when a feature is created without one.
pub const DEFAULT_PRIORITY: i64 = 2;

/// A unit of backlog work executed by an AI agent.
///
/// Features are created by external collaborators (the UI, planning tools)
/// and mutated by the auto-loop when it dispatches them and when the agent
/// runner reports back. The scheduler never deletes a feature.
///
/// Identity is the pair `(project_path, id)`; ids only need to be unique
/// within a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    pub project_path: String,
    pub title: String,
    pub description: Option<String>,
    pub status: FeatureStatus,
    /// Ids of features that must be `verified` before this one may run.
    pub dependencies: Vec<String>,
    /// Lower value runs first.
    pub priority: i64,
    pub complexity: Complexity,
    /// Worktree branch this feature is scoped to. `None` is the primary worktree.
    pub branch_name: Option<String>,
    /// Message from the most recent failed run.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a feature.
///
/// - `Backlog`: waiting to be picked up by an auto-loop
/// - `InProgress`: dispatched to an agent
/// - `WaitingApproval`: agent finished, a human has to sign off
/// - `Verified`: terminal success; unblocks dependents
/// - `Failed`: agent run failed, see `Feature::error`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Backlog,
    InProgress,
    WaitingApproval,
    Verified,
    Failed,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::WaitingApproval => "waiting_approval",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in_progress" => Ok(Self::InProgress),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown feature status '{}'", other)),
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rough size of a feature. Informational only; the scheduler ignores it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "moderate" => Ok(Self::Moderate),
            "complex" => Ok(Self::Complex),
            other => Err(format!("unknown complexity '{}'", other)),
        }
    }
}

/// Input for creating a new feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeatureInput {
    /// Caller-chosen id. A `feature-<uuid>` id is generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Initial status. Defaults to `Backlog`.
    #[serde(default)]
    pub status: Option<FeatureStatus>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Defaults to [`DEFAULT_PRIORITY`].
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

/// Partial update of a feature. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFeatureInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<FeatureStatus>,
    pub dependencies: Option<Vec<String>>,
    pub priority: Option<i64>,
    pub complexity: Option<Complexity>,
    pub branch_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_text_form() {
        for status in [
            FeatureStatus::Backlog,
            FeatureStatus::InProgress,
            FeatureStatus::WaitingApproval,
            FeatureStatus::Verified,
            FeatureStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<FeatureStatus>(), Ok(status));
        }
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&FeatureStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
    }

    #[test]
    fn create_input_accepts_minimal_body() {
        let input: CreateFeatureInput = serde_json::from_str(r#"{"title":"Login"}"#).unwrap();
        assert_eq!(input.title, "Login");
        assert!(input.dependencies.is_empty());
        assert!(input.priority.is_none());
    }
}
