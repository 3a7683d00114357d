use wayline_core::error::{Result, WaylineError};
use wayline_core::state::{StateSnapshot, StateValue};

use crate::graph::StateSchema;

/// Typed state of one run.
///
/// Every value in here satisfies the workflow's schema: updates are checked
/// as a whole before any of them is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    values: StateSnapshot,
}

impl RunState {
    /// Schema defaults overlaid with the trigger data keys the schema
    /// declares. Undeclared keys are ignored; a declared key of the wrong
    /// type is a schema error.
    pub fn initialize(
        schema: &StateSchema,
        trigger_data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let mut values = schema.defaults();
        for (key, raw) in trigger_data {
            if schema.contains(key) {
                values.insert(key.clone(), schema.coerce(key, raw)?);
            }
        }
        Ok(Self { values })
    }

    /// Rebuild from persisted values, rechecking them against the schema.
    pub fn from_snapshot(schema: &StateSchema, snapshot: StateSnapshot) -> Result<Self> {
        let mut values = schema.defaults();
        for (key, value) in snapshot {
            match schema.type_of(&key) {
                Some(ty) if ty == value.state_type() => {
                    values.insert(key, value);
                }
                Some(ty) => {
                    return Err(WaylineError::Schema(format!(
                        "stored '{}' is {}, schema says {}",
                        key,
                        value.state_type(),
                        ty
                    )))
                }
                None => {
                    return Err(WaylineError::Schema(format!(
                        "stored key '{}' is no longer declared",
                        key
                    )))
                }
            }
        }
        Ok(Self { values })
    }

    /// Check updates without applying them.
    pub fn validate(
        schema: &StateSchema,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<StateSnapshot> {
        schema.coerce_all(updates)
    }

    /// Merge already-typed values; returns the keys whose value changed.
    pub fn merge(&mut self, typed: StateSnapshot) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in typed {
            if self.values.get(&key) != Some(&value) {
                changed.push(key.clone());
                self.values.insert(key, value);
            }
        }
        changed
    }

    /// Validate then merge. Nothing is applied when any key is invalid.
    pub fn apply(
        &mut self,
        schema: &StateSchema,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>> {
        let typed = Self::validate(schema, updates)?;
        Ok(self.merge(typed))
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.values
    }

    /// The subset of values named by `keys`, for persisting changed rows.
    pub fn select<'a>(&'a self, keys: &'a [String]) -> impl Iterator<Item = (&'a String, &'a StateValue)> {
        self.values.iter().filter(move |(k, _)| keys.contains(*k))
    }
}
