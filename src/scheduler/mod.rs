//! Auto-mode scheduler facade.
//!
//! [`AutoModeScheduler`] is the only entry point the rest of the system uses to
//! drive auto-loops. It owns the registry mapping each [`LoopKey`] to its loop
//! and enforces one loop per key. Keys are independent scheduling domains: an
//! operation on one key never touches another key's state.

mod auto_loop;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::db::FeatureStore;
use crate::error::{SchedulerError, SchedulerResult};
use crate::models::*;
use crate::runner::AgentRunner;

use auto_loop::{AutoLoop, LoopDeps};

/// Concurrency ceiling used when a key is started without one.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Scheduler-wide settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_max_concurrency: usize,
    /// Status given to a feature whose agent run succeeded: `WaitingApproval`
    /// for human sign-off, or `Verified` to unblock dependents right away.
    pub success_status: FeatureStatus,
    /// Heartbeat between event-driven ticks.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: DEFAULT_MAX_CONCURRENCY,
            success_status: FeatureStatus::WaitingApproval,
            tick_interval: Duration::from_secs(5),
        }
    }
}

struct SchedulerInner {
    loops: Mutex<BTreeMap<LoopKey, AutoLoop>>,
    store: Arc<dyn FeatureStore>,
    runner: Arc<dyn AgentRunner>,
    config: SchedulerConfig,
}

/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct AutoModeScheduler {
    inner: Arc<SchedulerInner>,
}

impl AutoModeScheduler {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        runner: Arc<dyn AgentRunner>,
        mut config: SchedulerConfig,
    ) -> Self {
        if config.default_max_concurrency == 0 {
            warn!(
                "default_max_concurrency was 0, defaulting to {}",
                DEFAULT_MAX_CONCURRENCY
            );
            config.default_max_concurrency = DEFAULT_MAX_CONCURRENCY;
        }
        Self {
            inner: Arc::new(SchedulerInner {
                loops: Mutex::new(BTreeMap::new()),
                store,
                runner,
                config,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Start the auto-loop for a key, creating it on first use.
    ///
    /// Idempotent: starting a running key reports `already_running` and keeps
    /// its ceiling. A `max_concurrency` of zero is ignored and the previous (or
    /// default) ceiling is reused. Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        project_path: &str,
        branch_name: Option<&str>,
        max_concurrency: Option<usize>,
    ) -> SchedulerResult<StartOutcome> {
        let key = Self::key(project_path, branch_name)?;
        let max_concurrency = match max_concurrency {
            Some(0) => {
                warn!(key = %key, "ignoring max_concurrency of 0");
                None
            }
            other => other,
        };

        let mut loops = self.inner.loops.lock();
        if !loops.contains_key(&key) {
            let runtime = Handle::try_current().map_err(|_| {
                SchedulerError::Internal("auto-loops require a Tokio runtime".to_string())
            })?;
            debug!(key = %key, "creating auto-loop");
            let auto_loop = AutoLoop::spawn(
                &runtime,
                key.clone(),
                self.inner.config.default_max_concurrency,
                LoopDeps {
                    store: Arc::clone(&self.inner.store),
                    runner: Arc::clone(&self.inner.runner),
                    success_status: self.inner.config.success_status,
                    tick_interval: self.inner.config.tick_interval,
                },
            );
            loops.insert(key.clone(), auto_loop);
        }

        // Started under the registry lock so pruning cannot orphan the loop.
        let outcome = match loops.get(&key) {
            Some(auto_loop) => auto_loop.start(max_concurrency),
            None => {
                return Err(SchedulerError::Internal(format!(
                    "auto-loop for {} disappeared during start",
                    key
                )))
            }
        };
        Ok(outcome)
    }

    /// Stop dispatching for a key. Idempotent; unknown keys report not running.
    pub fn stop(&self, project_path: &str, branch_name: Option<&str>) -> SchedulerResult<StopOutcome> {
        let key = Self::key(project_path, branch_name)?;
        let loops = self.inner.loops.lock();
        Ok(match loops.get(&key) {
            Some(auto_loop) => auto_loop.stop(),
            None => StopOutcome {
                was_running: false,
                running_features_count: 0,
            },
        })
    }

    pub fn is_running(&self, project_path: &str, branch_name: Option<&str>) -> bool {
        let key = LoopKey::new(project_path, branch_name.map(str::to_string));
        self.inner
            .loops
            .lock()
            .get(&key)
            .is_some_and(AutoLoop::is_running)
    }

    /// Status of one key. Keys that were never started report an empty,
    /// stopped loop with the default ceiling.
    pub fn status_for_project(&self, project_path: &str, branch_name: Option<&str>) -> ProjectStatus {
        let key = LoopKey::new(project_path, branch_name.map(str::to_string));
        match self.inner.loops.lock().get(&key) {
            Some(auto_loop) => auto_loop.status(),
            None => ProjectStatus {
                is_auto_loop_running: false,
                running_features: Vec::new(),
                running_count: 0,
                max_concurrency: self.inner.config.default_max_concurrency,
            },
        }
    }

    /// Aggregate over every key, including stopped keys still draining.
    pub fn global_status(&self) -> GlobalStatus {
        let loops = self.inner.loops.lock();
        let mut running_features = Vec::new();
        let mut active_loops = 0;
        for auto_loop in loops.values() {
            let status = auto_loop.status();
            if status.is_auto_loop_running {
                active_loops += 1;
            }
            running_features.extend(status.running_features);
        }

        GlobalStatus {
            is_running: active_loops > 0,
            running_count: running_features.len(),
            running_features,
            active_loops,
        }
    }

    /// Distinct project paths with at least one running loop.
    pub fn active_auto_loop_projects(&self) -> Vec<String> {
        let loops = self.inner.loops.lock();
        loops
            .iter()
            .filter(|(_, auto_loop)| auto_loop.is_running())
            .map(|(key, _)| key.project_path.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every key with a running loop.
    pub fn active_auto_loop_worktrees(&self) -> Vec<WorktreeRef> {
        let loops = self.inner.loops.lock();
        loops
            .iter()
            .filter(|(_, auto_loop)| auto_loop.is_running())
            .map(|(key, _)| WorktreeRef::from(key))
            .collect()
    }

    /// Ask every loop of a project to re-evaluate now, e.g. after a feature
    /// was edited outside the scheduler.
    pub fn notify_features_changed(&self, project_path: &str) {
        let loops = self.inner.loops.lock();
        for (_, auto_loop) in loops
            .iter()
            .filter(|(key, _)| key.project_path == project_path)
        {
            auto_loop.request_tick();
        }
    }

    /// Drop loops that are stopped and fully drained. Returns how many were
    /// removed. A later `start` recreates the key with the default ceiling.
    pub fn prune_idle(&self) -> usize {
        let mut loops = self.inner.loops.lock();
        let before = loops.len();
        loops.retain(|key, auto_loop| {
            let idle = auto_loop.is_idle();
            if idle {
                debug!(key = %key, "pruning idle auto-loop");
            }
            !idle
        });
        before - loops.len()
    }

    /// Number of keys currently tracked, running or not.
    pub fn loop_count(&self) -> usize {
        self.inner.loops.lock().len()
    }

    fn key(project_path: &str, branch_name: Option<&str>) -> SchedulerResult<LoopKey> {
        if project_path.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "projectPath is required".to_string(),
            ));
        }
        Ok(LoopKey::new(project_path, branch_name.map(str::to_string)))
    }
}
