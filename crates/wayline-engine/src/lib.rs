//! Workflow graph model, execution engine and trigger scheduler.
//!
//! A [`DefinitionStore`] loads validated [`Workflow`]s; the
//! [`WorkflowEngine`] steps runs through them and persists every step to a
//! [`wayline_store::WorkflowStore`]; the [`TriggerScheduler`] advances runs
//! on its own from time, keyword and state-change triggers.

pub mod definitions;
pub mod engine;
pub mod graph;
pub mod run_log;
pub mod scheduler;
pub mod state;

pub use definitions::DefinitionStore;
pub use engine::{RunReport, StatusReport, WorkflowEngine, WorkflowReport};
pub use graph::{Edge, Node, Transition, Workflow, WorkflowDefinition};
pub use run_log::RunLogger;
pub use scheduler::{SchedulerHandle, TriggerEvent, TriggerScheduler};
pub use state::RunState;
