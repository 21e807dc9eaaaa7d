//! The per-key control loop.
//!
//! Every auto-loop owns one driver task fed by an event channel. Ticks,
//! completions and heartbeats are all handled by that task, one at a time, so
//! candidate selection and slot accounting for a key are serialized without a
//! lock held across await points. The state mutex only guards against readers
//! (status queries, start/stop) observing a half-applied change.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::db::FeatureStore;
use crate::graph::FeatureGraph;
use crate::models::*;
use crate::runner::{AgentRunner, FeatureJob, FeatureOutcome};

/// Smallest heartbeat period accepted; `interval` panics on zero.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub(crate) enum LoopEvent {
    Tick,
    Completed(FeatureOutcome),
}

#[derive(Debug)]
struct LoopState {
    is_running: bool,
    max_concurrency: usize,
    /// In dispatch order. Never longer than `max_concurrency`.
    running: Vec<String>,
    /// Requested ceiling below the current running count, applied as the
    /// running set drains.
    target_concurrency: Option<usize>,
    /// Outcomes the store failed to record. Their ids stay in `running`.
    unrecorded: Vec<FeatureOutcome>,
    cancellation_requested: bool,
}

impl LoopState {
    /// Lower the ceiling towards the target without dropping below the
    /// features still in flight.
    fn shrink_to_target(&mut self) {
        if let Some(target) = self.target_concurrency {
            self.max_concurrency = target.max(self.running.len());
            if self.max_concurrency == target {
                self.target_concurrency = None;
            }
        }
    }
}

struct LoopShared {
    key: LoopKey,
    state: Mutex<LoopState>,
    store: Arc<dyn FeatureStore>,
    runner: Arc<dyn AgentRunner>,
    success_status: FeatureStatus,
}

/// Handle to one key's loop. Dropping the last handle lets the driver exit
/// once nothing is in flight.
pub(crate) struct AutoLoop {
    shared: Arc<LoopShared>,
    events: UnboundedSender<LoopEvent>,
}

pub(crate) struct LoopDeps {
    pub store: Arc<dyn FeatureStore>,
    pub runner: Arc<dyn AgentRunner>,
    pub success_status: FeatureStatus,
    pub tick_interval: Duration,
}

impl AutoLoop {
    /// Create a stopped loop and spawn its driver on `runtime`.
    pub(crate) fn spawn(
        runtime: &Handle,
        key: LoopKey,
        max_concurrency: usize,
        deps: LoopDeps,
    ) -> Self {
        let shared = Arc::new(LoopShared {
            key,
            state: Mutex::new(LoopState {
                is_running: false,
                max_concurrency,
                running: Vec::new(),
                target_concurrency: None,
                unrecorded: Vec::new(),
                cancellation_requested: false,
            }),
            store: deps.store,
            runner: deps.runner,
            success_status: deps.success_status,
        });

        let (events, receiver) = mpsc::unbounded_channel();
        let driver = Driver {
            shared: Arc::clone(&shared),
            events: receiver,
            sender: events.downgrade(),
        };
        runtime.spawn(driver.run(deps.tick_interval.max(MIN_TICK_INTERVAL)));

        Self { shared, events }
    }

    /// Transition to running. A running loop is left untouched, including its
    /// concurrency ceiling.
    pub(crate) fn start(&self, max_concurrency: Option<usize>) -> StartOutcome {
        let mut state = self.shared.state.lock();
        if state.is_running {
            return StartOutcome {
                already_running: true,
                max_concurrency: state.max_concurrency,
            };
        }

        if let Some(max) = max_concurrency {
            let in_flight = state.running.len();
            if max < in_flight {
                warn!(
                    key = %self.shared.key,
                    requested = max,
                    running = in_flight,
                    "ceiling below features still draining, lowering it as they finish"
                );
                state.max_concurrency = in_flight;
                state.target_concurrency = Some(max);
            } else {
                state.max_concurrency = max;
                state.target_concurrency = None;
            }
        }
        state.is_running = true;
        state.cancellation_requested = false;
        let outcome = StartOutcome {
            already_running: false,
            max_concurrency: state.max_concurrency,
        };
        drop(state);

        info!(
            project_path = %self.shared.key.project_path,
            branch_name = ?self.shared.key.branch_name,
            max_concurrency = outcome.max_concurrency,
            "auto-loop started"
        );
        self.request_tick();
        outcome
    }

    /// Stop dispatching. In-flight features keep running and still report back.
    pub(crate) fn stop(&self) -> StopOutcome {
        let mut state = self.shared.state.lock();
        let was_running = state.is_running;
        state.is_running = false;
        state.cancellation_requested = true;
        let outcome = StopOutcome {
            was_running,
            running_features_count: state.running.len(),
        };
        drop(state);

        if was_running {
            info!(
                project_path = %self.shared.key.project_path,
                branch_name = ?self.shared.key.branch_name,
                running = outcome.running_features_count,
                "auto-loop stopped"
            );
        }
        outcome
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shared.state.lock().is_running
    }

    /// Stopped with nothing left in flight.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        !state.is_running && state.running.is_empty()
    }

    pub(crate) fn status(&self) -> ProjectStatus {
        let state = self.shared.state.lock();
        ProjectStatus {
            is_auto_loop_running: state.is_running,
            running_features: state.running.clone(),
            running_count: state.running.len(),
            max_concurrency: state.max_concurrency,
        }
    }

    pub(crate) fn request_tick(&self) {
        // The driver only goes away after every handle is dropped.
        let _ = self.events.send(LoopEvent::Tick);
    }
}

struct Driver {
    shared: Arc<LoopShared>,
    events: UnboundedReceiver<LoopEvent>,
    /// Weak so the channel closes once the registry lets go of the loop.
    sender: WeakUnboundedSender<LoopEvent>,
}

impl Driver {
    async fn run(mut self, tick_interval: Duration) {
        let mut heartbeat = interval_at(Instant::now() + tick_interval, tick_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(LoopEvent::Tick) => self.shared.tick(&self.sender),
                    Some(LoopEvent::Completed(outcome)) => {
                        self.shared.complete(outcome);
                        self.shared.tick(&self.sender);
                    }
                    None => break,
                },
                _ = heartbeat.tick() => self.shared.tick(&self.sender),
            }
        }

        debug!(key = %self.shared.key, "auto-loop driver exited");
    }
}

impl LoopShared {
    /// One scheduling pass: re-read the project, pick ready features in
    /// priority order and fill free slots.
    fn tick(&self, sender: &WeakUnboundedSender<LoopEvent>) {
        self.retry_unrecorded();
        if !self.state.lock().is_running {
            return;
        }

        let features = match self.store.list_features(&self.key.project_path) {
            Ok(features) => features,
            Err(e) => {
                // Abort this pass only; the next event or heartbeat retries.
                warn!(key = %self.key, error = %e, "failed to read features, skipping tick");
                return;
            }
        };
        let graph = FeatureGraph::build(&features);

        let mut state = self.state.lock();
        if !state.is_running || state.running.len() >= state.max_concurrency {
            return;
        }

        let running: HashSet<String> = state.running.iter().cloned().collect();
        let candidates = graph.ready_candidates(self.key.branch_name.as_deref(), &running);
        debug!(
            key = %self.key,
            candidates = candidates.len(),
            running = state.running.len(),
            max_concurrency = state.max_concurrency,
            "scheduling tick"
        );

        for feature in candidates {
            if state.running.len() >= state.max_concurrency {
                break;
            }
            self.dispatch(&mut state, feature, sender);
        }
    }

    fn dispatch(
        &self,
        state: &mut LoopState,
        feature: &Feature,
        sender: &WeakUnboundedSender<LoopEvent>,
    ) {
        let Some(sender) = sender.upgrade() else {
            return;
        };

        match self.store.set_status(
            &self.key.project_path,
            &feature.id,
            FeatureStatus::InProgress,
            None,
        ) {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = %self.key, feature_id = %feature.id, "feature vanished before dispatch");
                return;
            }
            Err(e) => {
                warn!(key = %self.key, feature_id = %feature.id, error = %e, "failed to mark feature in progress");
                return;
            }
        }

        state.running.push(feature.id.clone());
        info!(
            project_path = %self.key.project_path,
            branch_name = ?self.key.branch_name,
            feature_id = %feature.id,
            priority = feature.priority,
            running = state.running.len(),
            "dispatching feature"
        );

        let job = FeatureJob {
            key: self.key.clone(),
            feature: Feature {
                status: FeatureStatus::InProgress,
                error: None,
                ..feature.clone()
            },
        };
        let feature_id = feature.id.clone();

        let started = match catch_unwind(AssertUnwindSafe(|| self.runner.run_feature(job))) {
            Ok(Ok(run)) => Ok(run),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("agent runner panicked while starting the feature".to_string()),
        };

        match started {
            Ok(run) => {
                tokio::spawn(async move {
                    // Awaiting a separate task turns a panicking run into a failure.
                    let result = match tokio::spawn(run).await {
                        Ok(result) => result,
                        Err(e) => Err(format!("agent run aborted: {}", e)),
                    };
                    let outcome = match result {
                        Ok(()) => FeatureOutcome::Success { feature_id },
                        Err(message) => FeatureOutcome::Failure {
                            feature_id,
                            message,
                        },
                    };
                    let _ = sender.send(LoopEvent::Completed(outcome));
                });
            }
            Err(message) => {
                // Reported through the same path as an asynchronous failure.
                let _ = sender.send(LoopEvent::Completed(FeatureOutcome::Failure {
                    feature_id,
                    message,
                }));
            }
        }
    }

    /// Record a finished feature and free its slot. If the store cannot take
    /// the outcome the slot stays occupied and the write is retried on the
    /// next tick.
    fn complete(&self, outcome: FeatureOutcome) {
        let (status, error) = match &outcome {
            FeatureOutcome::Success { .. } => (self.success_status, None),
            FeatureOutcome::Failure { message, .. } => (FeatureStatus::Failed, Some(message.as_str())),
        };

        if let Err(e) = self
            .store
            .set_status(&self.key.project_path, outcome.feature_id(), status, error)
        {
            warn!(
                key = %self.key,
                feature_id = %outcome.feature_id(),
                error = %e,
                "failed to record feature outcome, will retry"
            );
            self.state.lock().unrecorded.push(outcome);
            return;
        }

        let mut state = self.state.lock();
        state
            .running
            .retain(|id| id.as_str() != outcome.feature_id());
        state.shrink_to_target();

        match &outcome {
            FeatureOutcome::Success { feature_id } => info!(
                key = %self.key,
                feature_id = %feature_id,
                status = %status,
                running = state.running.len(),
                "feature completed"
            ),
            FeatureOutcome::Failure {
                feature_id,
                message,
            } => warn!(
                key = %self.key,
                feature_id = %feature_id,
                error = %message,
                running = state.running.len(),
                cancelled = state.cancellation_requested,
                "feature failed"
            ),
        }
    }

    fn retry_unrecorded(&self) {
        let pending = std::mem::take(&mut self.state.lock().unrecorded);
        for outcome in pending {
            self.complete(outcome);
        }
    }
}
