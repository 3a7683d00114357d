use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WaylineError;

/// Declared type of a workflow state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Boolean,
    Integer,
    String,
    Object,
}

impl StateType {
    /// The value a variable takes when the schema declares no default.
    pub fn zero_value(&self) -> StateValue {
        match self {
            Self::Boolean => StateValue::Boolean(false),
            Self::Integer => StateValue::Integer(0),
            Self::String => StateValue::String(String::new()),
            Self::Object => StateValue::Object(serde_json::Map::new()),
        }
    }

    /// Whether values of this type may key a conditional edge.
    pub fn is_routable(&self) -> bool {
        !matches!(self, Self::Object)
    }

    /// Parse a branch label (the keys of a conditional edge's target map)
    /// into a value of this type.
    pub fn parse_branch(&self, label: &str) -> Option<StateValue> {
        match self {
            Self::Boolean => match label {
                "true" => Some(StateValue::Boolean(true)),
                "false" => Some(StateValue::Boolean(false)),
                _ => None,
            },
            Self::Integer => label.trim().parse::<i64>().ok().map(StateValue::Integer),
            Self::String => Some(StateValue::String(label.to_string())),
            Self::Object => None,
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Integer => write!(f, "integer"),
            Self::String => write!(f, "string"),
            Self::Object => write!(f, "object"),
        }
    }
}

impl FromStr for StateType {
    type Err = WaylineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(Self::Boolean),
            "integer" => Ok(Self::Integer),
            "string" => Ok(Self::String),
            "object" => Ok(Self::Object),
            other => Err(WaylineError::Schema(format!("unknown state type '{}'", other))),
        }
    }
}

/// A typed state value. The closed set of variants is enforced at the
/// state store boundary; raw JSON never reaches a run's state unchecked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl StateValue {
    pub fn state_type(&self) -> StateType {
        match self {
            Self::Boolean(_) => StateType::Boolean,
            Self::Integer(_) => StateType::Integer,
            Self::String(_) => StateType::String,
            Self::Object(_) => StateType::Object,
        }
    }

    /// Convert a JSON value into a state value of the expected type.
    /// Returns `None` on a type mismatch (floats are not integers).
    pub fn from_json(expected: StateType, value: &serde_json::Value) -> Option<Self> {
        match (expected, value) {
            (StateType::Boolean, serde_json::Value::Bool(b)) => Some(Self::Boolean(*b)),
            (StateType::Integer, serde_json::Value::Number(n)) => n.as_i64().map(Self::Integer),
            (StateType::String, serde_json::Value::String(s)) => Some(Self::String(s.clone())),
            (StateType::Object, serde_json::Value::Object(m)) => Some(Self::Object(m.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Object(m) => serde_json::Value::Object(m.clone()),
        }
    }

    /// Canonical label used to look this value up in a conditional edge.
    /// Object values never route.
    pub fn branch_label(&self) -> Option<String> {
        match self {
            Self::Boolean(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Object(_) => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Ordered name → value map of a run's state.
pub type StateSnapshot = BTreeMap<String, StateValue>;
