use serde::{Deserialize, Serialize};

/// A step in the workflow graph.
///
/// The intent is free text handed to the host agent; the engine never
/// interprets it. Preferred actions name tools the host should favour while
/// executing the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    /// Instruction for the host agent.
    #[serde(default)]
    pub intent: String,
    /// Tool names, in order of preference.
    #[serde(default)]
    pub preferred_actions: Vec<String>,
}

impl Node {
    /// Create a new node with minimal configuration.
    pub fn new(id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            intent: intent.into(),
            preferred_actions: vec![],
        }
    }

    /// Set the preferred actions.
    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.preferred_actions = actions;
        self
    }
}
