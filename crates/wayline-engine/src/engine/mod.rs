//! Execution engine: the state machine that steps runs through their
//! workflow graphs.
//!
//! Every live run sits behind its own mutex in the run table. Operations on
//! one run take that run's lock, write to the store, and only then update
//! the in-memory copy. The run table lock is never held while waiting for a
//! run lock, so the scheduler and host calls on different runs never
//! contend.

mod live;
mod recovery;
mod status;
mod triggers;

pub use status::{RunReport, StatusReport, WorkflowReport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wayline_core::error::{Result, WaylineError};
use wayline_core::event::EventBus;
use wayline_core::traits::HostBridge;
use wayline_core::trigger::ActiveTrigger;
use wayline_core::types::{
    EngineEvent, ErrorCategory, ErrorRecord, NextStep, RunId, RunRecord, RunStatus, StepOutcome,
    StepRecord, StepStatus, WorkflowSummary, END_NODE, START_NODE,
};
use wayline_store::{RunWrite, WorkflowStore};

use crate::definitions::DefinitionStore;
use crate::state::RunState;

use live::LiveRun;

type RunHandle = Arc<Mutex<LiveRun>>;

fn lock(handle: &Mutex<LiveRun>) -> MutexGuard<'_, LiveRun> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drives workflow runs and owns their live state.
pub struct WorkflowEngine {
    definitions: Arc<DefinitionStore>,
    store: Arc<WorkflowStore>,
    host: Arc<dyn HostBridge>,
    events: Arc<EventBus>,
    runs: RwLock<HashMap<RunId, RunHandle>>,
    /// Running runs per workflow in start order; the last one is focused.
    focus: RwLock<HashMap<String, Vec<RunId>>>,
    triggers_changed: Notify,
}

impl WorkflowEngine {
    /// Create an engine and resume supervision of every run the store
    /// still lists as `running`.
    pub fn new(
        definitions: Arc<DefinitionStore>,
        store: Arc<WorkflowStore>,
        host: Arc<dyn HostBridge>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let engine = Self {
            definitions,
            store,
            host,
            events,
            runs: RwLock::new(HashMap::new()),
            focus: RwLock::new(HashMap::new()),
            triggers_changed: Notify::new(),
        };
        engine.recover()?;
        Ok(engine)
    }

    pub fn definitions(&self) -> &Arc<DefinitionStore> {
        &self.definitions
    }

    pub fn store(&self) -> &Arc<WorkflowStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Signalled whenever the set of live triggers changes.
    pub fn triggers_changed(&self) -> &Notify {
        &self.triggers_changed
    }

    /// Start a run of `workflow_id` and move it to its entry node.
    pub fn start(
        &self,
        workflow_id: &str,
        trigger_type: &str,
        trigger_data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<RunId> {
        if !self.definitions.exists(workflow_id) {
            return Err(WaylineError::NotFound(format!("workflow '{}'", workflow_id)));
        }
        let workflow = self.definitions.load(workflow_id)?;
        let state = RunState::initialize(workflow.schema(), &trigger_data)?;
        let entry = workflow
            .entry_transition()
            .ok_or_else(|| WaylineError::definition(workflow_id, "no edge leaves START"))?
            .resolve(START_NODE, state.snapshot())?
            .to_string();

        let now = Utc::now();
        let run_id = RunId::new();
        let reached_end = entry == END_NODE;
        let record = RunRecord {
            run_id: run_id.clone(),
            workflow_id: workflow.id.clone(),
            status: if reached_end {
                RunStatus::Completed
            } else {
                RunStatus::Running
            },
            trigger_type: trigger_type.to_string(),
            trigger_data,
            current_node: entry.clone(),
            started_at: now,
            completed_at: reached_end.then_some(now),
            error_count: 0,
        };
        let start_step = live::start_record(&record, &state, now);
        let triggers: Vec<ActiveTrigger> = if reached_end {
            vec![]
        } else {
            workflow
                .triggers()
                .iter()
                .enumerate()
                .map(|(index, spec)| ActiveTrigger::new(run_id.clone(), index, spec.clone(), now))
                .collect()
        };

        self.store.upsert_workflow(&workflow.summary())?;
        self.store.commit(
            &RunWrite::new()
                .run(&record)
                .step(&start_step)
                .state(state.snapshot(), None)
                .triggers(&triggers),
        )?;

        info!(
            run_id = %run_id,
            workflow = %workflow.id,
            entry = %entry,
            triggers = triggers.len(),
            "Run started"
        );
        self.events.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
            workflow_id: workflow.id.clone(),
            entry_node: entry,
        });

        // Never admitted, so no tool load/unload pair reaches the host.
        if reached_end {
            info!(run_id = %run_id, "Run completed at start");
            self.events.publish(EngineEvent::RunCompleted {
                run_id: run_id.clone(),
            });
            return Ok(run_id);
        }

        let has_triggers = !triggers.is_empty();
        let live = LiveRun {
            record,
            workflow: workflow.clone(),
            state,
            triggers,
            last_sequence: 0,
            node_entered_at: now,
        };
        self.admit(live);
        self.host.load_tools(&run_id, workflow.tool_set());
        if has_triggers {
            self.triggers_changed.notify_one();
        }
        Ok(run_id)
    }

    /// What the host should do now. Read-only.
    pub fn get_next_step(&self, run_id: &RunId) -> Result<NextStep> {
        let handle = self.running(run_id)?;
        let run = lock(&handle);
        run.ensure_running()?;
        let node = run.workflow.node(&run.record.current_node).ok_or_else(|| {
            WaylineError::InvalidState(format!(
                "run {} is at {}",
                run_id, run.record.current_node
            ))
        })?;
        Ok(NextStep {
            run_id: run_id.clone(),
            node_id: node.id.clone(),
            intent: node.intent.clone(),
            preferred_actions: node.preferred_actions.clone(),
            state: run.state.snapshot().clone(),
        })
    }

    /// Report the current node as done, merge `state_updates` and follow the
    /// node's outgoing edge.
    ///
    /// A schema violation or an unresolvable conditional edge fails the run,
    /// records one State error, and is returned to the caller.
    pub fn complete_step(
        &self,
        run_id: &RunId,
        state_updates: &serde_json::Map<String, serde_json::Value>,
        actions_taken: &[String],
        observed_input: Option<&str>,
    ) -> Result<StepOutcome> {
        let handle = self.running(run_id)?;
        let mut run = lock(&handle);
        run.ensure_running()?;

        let now = Utc::now();
        let sequence = run.last_sequence + 1;
        let node_id = run.record.current_node.clone();
        let actions = actions_taken.to_vec();
        let observed = observed_input.map(str::to_string);

        let typed = match RunState::validate(run.workflow.schema(), state_updates) {
            Ok(typed) => typed,
            Err(e) => {
                let step =
                    run.step_record(sequence, actions, observed, &run.state, StepStatus::Failed, now);
                let write = RunWrite::new().step(&step);
                self.fail_locked(&mut run, write, &e, Some(sequence), now)?;
                return Err(e);
            }
        };

        let mut after = run.state.clone();
        let changed = after.merge(typed);

        let next = match run.workflow.transition_from(&node_id) {
            None => Ok(END_NODE.to_string()),
            Some(transition) => transition
                .resolve(&node_id, after.snapshot())
                .map(str::to_string),
        };
        let next = match next {
            Ok(next) => next,
            Err(e) => {
                let step =
                    run.step_record(sequence, actions, observed, &after, StepStatus::Failed, now);
                let write = RunWrite::new()
                    .step(&step)
                    .state(after.select(&changed), Some(sequence));
                self.fail_locked(&mut run, write, &e, Some(sequence), now)?;
                return Err(e);
            }
        };

        let step = run.step_record(sequence, actions, observed, &after, StepStatus::Completed, now);
        let reached_end = self.advance(&mut run, step, after, &changed, &next, now)?;
        debug!(run_id = %run_id, sequence, from = %node_id, to = %next, "Step completed");

        if !reached_end && !changed.is_empty() {
            self.fire_state_triggers(&mut run, &changed, now);
        }

        Ok(StepOutcome {
            sequence,
            next_node_id: next,
            reached_end,
        })
    }

    /// Cancel a running run. Terminal runs are left as they are.
    pub fn cancel(&self, run_id: &RunId) -> Result<()> {
        let Some(handle) = self.live(run_id) else {
            return match self.store.get_run(run_id)? {
                Some(_) => Ok(()),
                None => Err(WaylineError::NotFound(format!("run {}", run_id))),
            };
        };
        let mut run = lock(&handle);
        if !run.is_running() {
            return Ok(());
        }

        let now = Utc::now();
        let mut record = run.record.clone();
        record.status = RunStatus::Cancelled;
        record.completed_at = Some(now);
        self.store
            .commit(&RunWrite::new().run(&record).clear_triggers())?;
        run.record = record;

        info!(run_id = %run_id, node = %run.record.current_node, "Run cancelled");
        self.events.publish(EngineEvent::RunCancelled {
            run_id: run_id.clone(),
        });
        self.retire(&mut run);
        Ok(())
    }

    /// Record a host-classified error. An unrecoverable error fails a
    /// running run; terminal runs still accept errors for the audit trail.
    pub fn record_error(
        &self,
        run_id: &RunId,
        category: ErrorCategory,
        message: &str,
        recoverable: bool,
        recovery_action: Option<&str>,
        step_sequence: Option<u64>,
    ) -> Result<String> {
        let now = Utc::now();
        let error = ErrorRecord {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.clone(),
            step_sequence,
            category,
            message: message.to_string(),
            recoverable,
            recovery_action: recovery_action.map(str::to_string),
            occurred_at: now,
        };

        if let Some(handle) = self.live(run_id) {
            let mut run = lock(&handle);
            if run.is_running() {
                check_step(run_id, step_sequence, run.last_sequence)?;
                let mut record = run.record.clone();
                record.error_count += 1;
                if !recoverable {
                    record.status = RunStatus::Failed;
                    record.completed_at = Some(now);
                }
                let mut write = RunWrite::new().run(&record).error(&error);
                if !recoverable {
                    write = write.clear_triggers();
                }
                self.store.commit(&write)?;
                run.record = record;

                warn!(
                    run_id = %run_id,
                    category = %category,
                    recoverable,
                    message = %message,
                    "Error recorded"
                );
                self.events.publish(EngineEvent::ErrorRecorded {
                    run_id: run_id.clone(),
                    category,
                    message: message.to_string(),
                });
                if !recoverable {
                    self.events.publish(EngineEvent::RunFailed {
                        run_id: run_id.clone(),
                        reason: message.to_string(),
                    });
                    self.retire(&mut run);
                }
                return Ok(error.id);
            }
        }

        let mut record = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| WaylineError::NotFound(format!("run {}", run_id)))?;
        let last = self.store.last_step_sequence(run_id)?.unwrap_or(0);
        check_step(run_id, step_sequence, last)?;
        record.error_count += 1;
        self.store
            .commit(&RunWrite::new().run(&record).error(&error))?;
        debug!(run_id = %run_id, category = %category, "Error recorded on finished run");
        self.events.publish(EngineEvent::ErrorRecorded {
            run_id: run_id.clone(),
            category,
            message: message.to_string(),
        });
        Ok(error.id)
    }

    /// Merge externally observed state into a running run.
    ///
    /// Invalid updates are rejected and leave the run untouched. Returns the
    /// keys that changed.
    pub fn push_state(
        &self,
        run_id: &RunId,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>> {
        let handle = self.running(run_id)?;
        let mut run = lock(&handle);
        run.ensure_running()?;
        let typed = RunState::validate(run.workflow.schema(), updates)?;
        let now = Utc::now();
        let changed = self.merge_update(&mut run, typed, "push_state", now)?;
        if run.is_running() && !changed.is_empty() {
            self.fire_state_triggers(&mut run, &changed, now);
        }
        Ok(changed)
    }

    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        self.definitions.list()
    }

    /// The run the host is driving for a workflow: its most recently
    /// started run that is still running.
    pub fn focused_run(&self, workflow_id: &str) -> Option<RunId> {
        self.focus
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(workflow_id)
            .and_then(|runs| runs.last().cloned())
    }

    /// Ids of every run under supervision.
    pub fn active_runs(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self
            .runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn live(&self, run_id: &RunId) -> Option<RunHandle> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned()
    }

    fn live_handles(&self) -> Vec<RunHandle> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// The live handle of a running run, or the error explaining why there
    /// is none.
    fn running(&self, run_id: &RunId) -> Result<RunHandle> {
        if let Some(handle) = self.live(run_id) {
            return Ok(handle);
        }
        match self.store.get_run(run_id)? {
            Some(record) => Err(WaylineError::InvalidState(format!(
                "run {} is {}",
                run_id, record.status
            ))),
            None => Err(WaylineError::NotFound(format!("run {}", run_id))),
        }
    }

    fn admit(&self, live: LiveRun) {
        let run_id = live.record.run_id.clone();
        let workflow_id = live.record.workflow_id.clone();
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id.clone(), Arc::new(Mutex::new(live)));
        self.focus
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(workflow_id)
            .or_default()
            .push(run_id);
    }

    /// Drop a run that left `running` from supervision. Called with the
    /// run's lock held.
    fn retire(&self, run: &mut LiveRun) {
        let run_id = run.record.run_id.clone();
        run.triggers.clear();
        self.host.unload_tools(&run_id, run.workflow.tool_set());
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_id);
        let mut focus = self.focus.write().unwrap_or_else(|e| e.into_inner());
        let emptied = match focus.get_mut(&run.record.workflow_id) {
            Some(runs) => {
                runs.retain(|id| id != &run_id);
                runs.is_empty()
            }
            None => false,
        };
        if emptied {
            focus.remove(&run.record.workflow_id);
        }
        drop(focus);
        self.triggers_changed.notify_one();
    }

    /// Record `step` leaving the current node and move the run to `next`.
    /// Returns whether the run reached the end.
    fn advance(
        &self,
        run: &mut LiveRun,
        step: StepRecord,
        after: RunState,
        changed: &[String],
        next: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let reached_end = next == END_NODE;
        let mut record = run.record.clone();
        record.current_node = next.to_string();
        if reached_end {
            record.status = RunStatus::Completed;
            record.completed_at = Some(now);
        }
        let mut write = RunWrite::new()
            .run(&record)
            .step(&step)
            .state(after.select(changed), Some(step.sequence));
        if reached_end {
            write = write.clear_triggers();
        }
        self.store.commit(&write)?;

        run.record = record;
        run.state = after;
        run.last_sequence = step.sequence;
        run.node_entered_at = now;

        let run_id = run.record.run_id.clone();
        self.events.publish(EngineEvent::StepCompleted {
            run_id: run_id.clone(),
            sequence: step.sequence,
            node_id: step.node_id,
            next_node: next.to_string(),
        });
        if !changed.is_empty() {
            self.events.publish(EngineEvent::StateChanged {
                run_id: run_id.clone(),
                keys: changed.to_vec(),
            });
        }
        if reached_end {
            info!(run_id = %run_id, steps = run.last_sequence, "Run completed");
            self.events.publish(EngineEvent::RunCompleted { run_id });
            self.retire(run);
        }
        Ok(reached_end)
    }

    /// Fail a running run with a State error, committing `write` (the failed
    /// step and any state it carried) in the same transaction.
    fn fail_locked(
        &self,
        run: &mut LiveRun,
        write: RunWrite,
        cause: &WaylineError,
        step_sequence: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut record = run.record.clone();
        record.status = RunStatus::Failed;
        record.completed_at = Some(now);
        record.error_count += 1;
        let error = ErrorRecord {
            id: Uuid::new_v4().to_string(),
            run_id: record.run_id.clone(),
            step_sequence,
            category: ErrorCategory::State,
            message: cause.to_string(),
            recoverable: false,
            recovery_action: None,
            occurred_at: now,
        };
        self.store
            .commit(&write.run(&record).error(&error).clear_triggers())?;

        if let Some(sequence) = step_sequence {
            run.last_sequence = run.last_sequence.max(sequence);
        }
        run.record = record;

        let run_id = run.record.run_id.clone();
        warn!(run_id = %run_id, node = %run.record.current_node, error = %cause, "Run failed");
        self.events.publish(EngineEvent::ErrorRecorded {
            run_id: run_id.clone(),
            category: ErrorCategory::State,
            message: error.message,
        });
        self.events.publish(EngineEvent::RunFailed {
            run_id,
            reason: cause.to_string(),
        });
        self.retire(run);
        Ok(())
    }
}

/// An error may only reference a step that was recorded.
fn check_step(run_id: &RunId, step_sequence: Option<u64>, last: u64) -> Result<()> {
    match step_sequence {
        Some(sequence) if sequence > last => Err(WaylineError::NotFound(format!(
            "step {} of run {}",
            sequence, run_id
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests;
