use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use wayline_core::error::{Result, WaylineError};
use wayline_core::types::{EngineEvent, ErrorCategory, ErrorRecord, RunRecord, RunStatus};
use wayline_store::RunWrite;

use super::live::LiveRun;
use super::WorkflowEngine;
use crate::state::RunState;

impl WorkflowEngine {
    /// Reload every `running` run from the store. Runs that can no longer
    /// be resumed are failed with an Unexpected error.
    pub(super) fn recover(&self) -> Result<usize> {
        let running = self.store.list_runs_with_status(RunStatus::Running)?;
        let mut restored = 0;
        for record in running {
            match self.restore(&record) {
                Ok(live) => {
                    let run_id = live.record.run_id.clone();
                    let tools = live.workflow.tool_set().to_vec();
                    self.admit(live);
                    self.host.load_tools(&run_id, &tools);
                    restored += 1;
                }
                Err(e) => {
                    warn!(run_id = %record.run_id, workflow = %record.workflow_id, error = %e, "Cannot resume run");
                    self.fail_unrecoverable(record, &e)?;
                }
            }
        }
        if restored > 0 {
            info!(count = restored, "Resumed running runs");
            self.triggers_changed.notify_one();
        }
        Ok(restored)
    }

    fn restore(&self, record: &RunRecord) -> Result<LiveRun> {
        let workflow = self.definitions.load(&record.workflow_id)?;
        if workflow.node(&record.current_node).is_none() {
            return Err(WaylineError::definition(
                &record.workflow_id,
                format!("node '{}' no longer exists", record.current_node),
            ));
        }
        let state = RunState::from_snapshot(workflow.schema(), self.store.load_state(&record.run_id)?)?;
        let triggers = self.store.list_triggers(&record.run_id)?;
        let steps = self.store.list_steps(&record.run_id)?;
        let (last_sequence, node_entered_at) = steps
            .last()
            .map(|s| (s.sequence, s.recorded_at))
            .unwrap_or((0, record.started_at));

        Ok(LiveRun {
            record: record.clone(),
            workflow,
            state,
            triggers,
            last_sequence,
            node_entered_at,
        })
    }

    fn fail_unrecoverable(&self, mut record: RunRecord, cause: &WaylineError) -> Result<()> {
        let now = Utc::now();
        record.status = RunStatus::Failed;
        record.completed_at = Some(now);
        record.error_count += 1;
        let error = ErrorRecord {
            id: Uuid::new_v4().to_string(),
            run_id: record.run_id.clone(),
            step_sequence: None,
            category: ErrorCategory::Unexpected,
            message: format!("run could not be resumed: {}", cause),
            recoverable: false,
            recovery_action: None,
            occurred_at: now,
        };
        self.store
            .commit(&RunWrite::new().run(&record).error(&error).clear_triggers())?;
        self.events.publish(EngineEvent::ErrorRecorded {
            run_id: record.run_id.clone(),
            category: ErrorCategory::Unexpected,
            message: error.message.clone(),
        });
        self.events.publish(EngineEvent::RunFailed {
            run_id: record.run_id,
            reason: error.message,
        });
        Ok(())
    }
}
