//! Durable record of workflow runs.
//!
//! One SQLite database holds the audit and recovery contract:
//! `workflows`, `workflow_runs`, `workflow_steps`, `workflow_errors`,
//! `workflow_state` and `workflow_active_triggers`. Every write for a run
//! goes through [`WorkflowStore::commit`] so a transition lands atomically.

mod journal;
mod runs;
mod state;
mod store;
mod triggers;

pub use state::StateRow;
pub use store::{RunWrite, WorkflowStore};
