use std::sync::Arc;

use chrono::{DateTime, Utc};

use wayline_core::error::{Result, WaylineError};
use wayline_core::trigger::ActiveTrigger;
use wayline_core::types::{RunRecord, RunStatus, StepRecord, StepStatus, START_NODE};

use crate::graph::Workflow;
use crate::state::RunState;

/// In-memory view of a run that is still `running`.
///
/// The persisted rows are the source of truth; this copy is only updated
/// after a write has committed.
pub(crate) struct LiveRun {
    pub record: RunRecord,
    pub workflow: Arc<Workflow>,
    pub state: RunState,
    pub triggers: Vec<ActiveTrigger>,
    /// Sequence of the last recorded step (0 is the start record).
    pub last_sequence: u64,
    pub node_entered_at: DateTime<Utc>,
}

impl LiveRun {
    pub fn ensure_running(&self) -> Result<()> {
        if self.record.status != RunStatus::Running {
            return Err(WaylineError::InvalidState(format!(
                "run {} is {}",
                self.record.run_id, self.record.status
            )));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.record.status == RunStatus::Running
    }

    pub fn current_intent(&self) -> String {
        self.workflow
            .node(&self.record.current_node)
            .map(|n| n.intent.clone())
            .unwrap_or_default()
    }

    /// A step leaving the current node, stamped with the time spent in it.
    pub fn step_record(
        &self,
        sequence: u64,
        actions_taken: Vec<String>,
        observed_input: Option<String>,
        state_after: &RunState,
        status: StepStatus,
        now: DateTime<Utc>,
    ) -> StepRecord {
        StepRecord {
            run_id: self.record.run_id.clone(),
            sequence,
            node_id: self.record.current_node.clone(),
            intent: self.current_intent(),
            actions_taken,
            observed_input,
            state_before: self.state.snapshot().clone(),
            state_after: state_after.snapshot().clone(),
            duration_ms: (now - self.node_entered_at).num_milliseconds().max(0) as u64,
            status,
            recorded_at: now,
        }
    }
}

/// The implicit step-0 record written when a run starts.
pub(crate) fn start_record(record: &RunRecord, state: &RunState, now: DateTime<Utc>) -> StepRecord {
    StepRecord {
        run_id: record.run_id.clone(),
        sequence: 0,
        node_id: START_NODE.to_string(),
        intent: String::new(),
        actions_taken: vec![],
        observed_input: None,
        state_before: state.snapshot().clone(),
        state_after: state.snapshot().clone(),
        duration_ms: 0,
        status: StepStatus::Started,
        recorded_at: now,
    }
}
