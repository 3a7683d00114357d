use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WaylineError;
use crate::state::StateSnapshot;

/// Reserved entry pseudo-node.
pub const START_NODE: &str = "START";
/// Reserved terminal pseudo-node.
pub const END_NODE: &str = "END";

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = WaylineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(WaylineError::Database(format!("unknown run status '{}'", other))),
        }
    }
}

/// Outcome recorded on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for StepStatus {
    type Err = WaylineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(WaylineError::Database(format!("unknown step status '{}'", other))),
        }
    }
}

/// Failure taxonomy. Every error record carries exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Host resource or hardware failure.
    System,
    /// The host's language-model call failed or timed out.
    Llm,
    /// Host perception failure.
    Vision,
    Network,
    /// Schema violation, unresolvable route, invalid run status.
    State,
    /// A tool invocation reported failure.
    Tool,
    /// No or ambiguous user response.
    Human,
    Unexpected,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Llm => "llm",
            Self::Vision => "vision",
            Self::Network => "network",
            Self::State => "state",
            Self::Tool => "tool",
            Self::Human => "human",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = WaylineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "llm" => Ok(Self::Llm),
            "vision" => Ok(Self::Vision),
            "network" => Ok(Self::Network),
            "state" => Ok(Self::State),
            "tool" => Ok(Self::Tool),
            "human" => Ok(Self::Human),
            "unexpected" => Ok(Self::Unexpected),
            other => Err(WaylineError::Config(format!("unknown error category '{}'", other))),
        }
    }
}

/// One execution instance of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub workflow_id: String,
    pub status: RunStatus,
    /// What started the run (e.g. "manual", "keyword", "schedule").
    pub trigger_type: String,
    /// Initial data supplied by the trigger, as given.
    #[serde(default)]
    pub trigger_data: serde_json::Map<String, serde_json::Value>,
    pub current_node: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub error_count: u32,
}

/// Immutable log record of one node's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: RunId,
    pub sequence: u64,
    pub node_id: String,
    pub intent: String,
    pub actions_taken: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_input: Option<String>,
    pub state_before: StateSnapshot,
    pub state_after: StateSnapshot,
    pub duration_ms: u64,
    pub status: StepStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Classified failure attached to a run and optionally a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_sequence: Option<u64>,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Cached definition metadata, as listed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    pub node_count: usize,
    pub trigger_count: usize,
}

/// What the host should do next for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextStep {
    pub run_id: RunId,
    pub node_id: String,
    pub intent: String,
    pub preferred_actions: Vec<String>,
    pub state: StateSnapshot,
}

/// Routing result of a completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub sequence: u64,
    pub next_node_id: String,
    pub reached_end: bool,
}

/// Events published on the [`EventBus`](crate::event::EventBus).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A run was started and entered its first node.
    RunStarted {
        run_id: RunId,
        workflow_id: String,
        entry_node: String,
    },
    /// A step was recorded and the run moved on.
    StepCompleted {
        run_id: RunId,
        sequence: u64,
        node_id: String,
        next_node: String,
    },
    /// State keys changed value.
    StateChanged { run_id: RunId, keys: Vec<String> },
    RunCompleted { run_id: RunId },
    RunFailed { run_id: RunId, reason: String },
    RunCancelled { run_id: RunId },
    /// A host- or engine-classified error was recorded.
    ErrorRecorded {
        run_id: RunId,
        category: ErrorCategory,
        message: String,
    },
    /// A progression trigger fired.
    TriggerFired {
        run_id: RunId,
        trigger_id: String,
        kind: String,
        fire_count: u64,
    },
    /// Ask the host agent to act on a run.
    PromptAgent { run_id: RunId, message: String },
    /// Ask the host to register the named tools for a run.
    LoadTools { run_id: RunId, tools: Vec<String> },
    /// Ask the host to unregister the named tools for a run.
    UnloadTools { run_id: RunId, tools: Vec<String> },
}

impl EngineEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StateChanged { run_id, .. }
            | Self::RunCompleted { run_id }
            | Self::RunFailed { run_id, .. }
            | Self::RunCancelled { run_id }
            | Self::ErrorRecorded { run_id, .. }
            | Self::TriggerFired { run_id, .. }
            | Self::PromptAgent { run_id, .. }
            | Self::LoadTools { run_id, .. }
            | Self::UnloadTools { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_error_category_parse_case_insensitive() {
        assert_eq!("LLM".parse::<ErrorCategory>().unwrap(), ErrorCategory::Llm);
        assert_eq!("tool".parse::<ErrorCategory>().unwrap(), ErrorCategory::Tool);
        assert!("gremlins".parse::<ErrorCategory>().is_err());
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = EngineEvent::PromptAgent {
            run_id: RunId::from_string("r1"),
            message: "check in".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "prompt_agent");
        assert_eq!(json["run_id"], "r1");
        assert_eq!(event.run_id().as_str(), "r1");
    }

    #[test]
    fn test_run_ids_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
