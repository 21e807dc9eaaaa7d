//! Seam to the agent execution engine.
//!
//! The scheduler hands a [`FeatureJob`] to an [`AgentRunner`] and forgets about
//! it until the returned future resolves. Implementations can be swapped: the
//! shell-command runner used by the server, or a scripted runner in tests.

mod command;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Feature, LoopKey};

pub use command::CommandRunner;

/// Future for one agent run. `Err` carries a human-readable failure message.
pub type RunFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

/// Raised when a runner refuses a job before any work starts.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("agent runner rejected feature: {0}")]
    Rejected(String),

    #[error("failed to spawn agent: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Everything a runner needs to work on one feature.
#[derive(Debug, Clone)]
pub struct FeatureJob {
    pub key: LoopKey,
    pub feature: Feature,
}

impl FeatureJob {
    pub fn feature_id(&self) -> &str {
        &self.feature.id
    }
}

/// How a dispatched feature ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureOutcome {
    Success { feature_id: String },
    Failure { feature_id: String, message: String },
}

impl FeatureOutcome {
    pub fn feature_id(&self) -> &str {
        match self {
            Self::Success { feature_id } | Self::Failure { feature_id, .. } => feature_id,
        }
    }
}

/// Executes features on behalf of an auto-loop.
///
/// `run_feature` is called while the loop holds its per-key state lock, so it
/// must return quickly: start the work and hand back a future. Returning `Err`
/// is a synchronous rejection and is recorded exactly like a failed run.
pub trait AgentRunner: Send + Sync {
    fn run_feature(&self, job: FeatureJob) -> Result<RunFuture, RunnerError>;
}
