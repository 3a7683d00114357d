use crate::types::RunId;

/// Capability contract between the engine and its host.
///
/// The engine only emits declarative requests; the host resolves tool names
/// to implementations and owns the agent. Implementations must return
/// quickly: the trigger scheduler calls `prompt_agent` from its tick and
/// never waits for the agent's reaction.
pub trait HostBridge: Send + Sync + 'static {
    /// Register the named tools for a run that just started.
    fn load_tools(&self, run_id: &RunId, tools: &[String]);

    /// Unregister the tools loaded for a run that left `running`.
    fn unload_tools(&self, run_id: &RunId, tools: &[String]);

    /// Nudge the agent to act on a run.
    fn prompt_agent(&self, run_id: &RunId, message: &str);
}
