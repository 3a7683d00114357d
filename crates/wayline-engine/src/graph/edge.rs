use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use wayline_core::error::{Result, WaylineError};
use wayline_core::state::{StateSnapshot, StateValue};

/// An edge as written in a definition file.
///
/// ```json
/// {"id": "e2", "source": "check", "type": "condition", "state_key": "awake",
///  "target": {"true": "greet", "false": "check"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    /// Source node id, or `START`.
    pub source: String,
    pub target: EdgeTarget,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
    /// Condition key; required for `condition` edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
}

/// Either a single node id or a map of branch label to node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeTarget {
    Node(String),
    Branches(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Normal,
    Condition,
}

impl Edge {
    /// Create a normal edge.
    pub fn normal(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target: EdgeTarget::Node(target),
            kind: EdgeKind::Normal,
            state_key: None,
        }
    }

    /// Create a conditional edge keyed on `state_key`.
    pub fn condition<I, L, T>(source: impl Into<String>, state_key: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = (L, T)>,
        L: Into<String>,
        T: Into<String>,
    {
        let source = source.into();
        Self {
            id: format!("{}?", source),
            source,
            target: EdgeTarget::Branches(
                branches
                    .into_iter()
                    .map(|(label, target)| (label.into(), target.into()))
                    .collect(),
            ),
            kind: EdgeKind::Condition,
            state_key: Some(state_key.into()),
        }
    }

    /// Every node id this edge can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match &self.target {
            EdgeTarget::Node(id) => vec![id.as_str()],
            EdgeTarget::Branches(map) => map.values().map(String::as_str).collect(),
        }
    }
}

/// The validated outgoing transition of a node.
///
/// Branch labels have already been parsed into typed values, so lookup is
/// plain equality against the run's current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Normal {
        target: String,
    },
    Conditional {
        state_key: String,
        branches: Vec<(StateValue, String)>,
    },
}

impl Transition {
    /// Resolve the next node against the given state.
    ///
    /// A conditional whose current value has no branch is a routing error;
    /// there is no silent default.
    pub fn resolve(&self, from: &str, state: &StateSnapshot) -> Result<&str> {
        match self {
            Self::Normal { target } => Ok(target),
            Self::Conditional {
                state_key,
                branches,
            } => {
                let current = state.get(state_key);
                current
                    .and_then(|value| {
                        branches
                            .iter()
                            .find(|(branch, _)| branch == value)
                            .map(|(_, target)| target.as_str())
                    })
                    .ok_or_else(|| WaylineError::Routing {
                        node: from.to_string(),
                        state_key: state_key.clone(),
                        value: current
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "<unset>".to_string()),
                    })
            }
        }
    }

    pub fn condition_key(&self) -> Option<&str> {
        match self {
            Self::Normal { .. } => None,
            Self::Conditional { state_key, .. } => Some(state_key),
        }
    }
}
