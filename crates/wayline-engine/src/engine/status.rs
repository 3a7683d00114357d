use serde::Serialize;

use wayline_core::error::Result;
use wayline_core::trigger::ActiveTrigger;
use wayline_core::types::{ErrorRecord, RunId, RunRecord, StepRecord, WorkflowSummary};
use wayline_store::StateRow;

use super::WorkflowEngine;

/// How many recent runs a workflow report lists.
const RECENT_RUNS: usize = 50;

/// Answer to a status query: either one run or one workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusReport {
    Run(RunReport),
    Workflow(WorkflowReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: RunRecord,
    /// Intent of the node the run is at, when that node still exists.
    pub current_intent: Option<String>,
    pub focused: bool,
    pub state: Vec<StateRow>,
    pub steps: Vec<StepRecord>,
    pub errors: Vec<ErrorRecord>,
    pub triggers: Vec<ActiveTrigger>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow: WorkflowSummary,
    pub focused_run: Option<RunId>,
    /// Newest first.
    pub runs: Vec<RunRecord>,
}

impl WorkflowEngine {
    /// Status of a run id, or of a workflow id or name.
    pub fn get_status(&self, name_or_run_id: &str) -> Result<StatusReport> {
        let run_id = RunId::from_string(name_or_run_id);
        if let Some(run) = self.store.get_run(&run_id)? {
            return self.run_report(run).map(StatusReport::Run);
        }

        let workflow = self.definitions.resolve(name_or_run_id)?;
        Ok(StatusReport::Workflow(WorkflowReport {
            focused_run: self.focused_run(&workflow.id),
            runs: self.store.list_runs(&workflow.id, RECENT_RUNS)?,
            workflow: workflow.summary(),
        }))
    }

    fn run_report(&self, run: RunRecord) -> Result<RunReport> {
        let current_intent = self
            .definitions
            .load(&run.workflow_id)
            .ok()
            .and_then(|wf| wf.node(&run.current_node).map(|n| n.intent.clone()));
        let focused = self.focused_run(&run.workflow_id).as_ref() == Some(&run.run_id);
        Ok(RunReport {
            current_intent,
            focused,
            state: self.store.load_state_rows(&run.run_id)?,
            steps: self.store.list_steps(&run.run_id)?,
            errors: self.store.list_errors(&run.run_id)?,
            triggers: self.store.list_triggers(&run.run_id)?,
            run,
        })
    }
}
