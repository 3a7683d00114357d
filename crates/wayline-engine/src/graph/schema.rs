use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use wayline_core::error::{Result, WaylineError};
use wayline_core::state::{StateSnapshot, StateType, StateValue};

/// A state variable as declared in `state_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    #[serde(rename = "type")]
    pub ty: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VariableDef {
    pub fn new(ty: StateType) -> Self {
        Self {
            ty,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Typed state schema of a workflow with resolved defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSchema {
    vars: BTreeMap<String, (StateType, StateValue)>,
}

impl StateSchema {
    /// Build from declarations. A default that does not match its declared
    /// type is rejected.
    pub fn from_defs(defs: &BTreeMap<String, VariableDef>) -> Result<Self> {
        let mut vars = BTreeMap::new();
        for (name, def) in defs {
            let default = match &def.default {
                None | Some(serde_json::Value::Null) => def.ty.zero_value(),
                Some(raw) => StateValue::from_json(def.ty, raw).ok_or_else(|| {
                    WaylineError::Schema(format!(
                        "default for '{}' is not a {}: {}",
                        name, def.ty, raw
                    ))
                })?,
            };
            vars.insert(name.clone(), (def.ty, default));
        }
        Ok(Self { vars })
    }

    pub fn type_of(&self, key: &str) -> Option<StateType> {
        self.vars.get(key).map(|(ty, _)| *ty)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn defaults(&self) -> StateSnapshot {
        self.vars
            .iter()
            .map(|(name, (_, default))| (name.clone(), default.clone()))
            .collect()
    }

    /// Check a declared key's raw JSON value against its type.
    pub fn coerce(&self, key: &str, raw: &serde_json::Value) -> Result<StateValue> {
        let ty = self
            .type_of(key)
            .ok_or_else(|| WaylineError::Schema(format!("undeclared state key '{}'", key)))?;
        StateValue::from_json(ty, raw).ok_or_else(|| {
            WaylineError::Schema(format!("'{}' expects {}, got {}", key, ty, raw))
        })
    }

    /// Check a whole update map, returning typed values in key order.
    pub fn coerce_all(
        &self,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<StateSnapshot> {
        updates
            .iter()
            .map(|(key, raw)| Ok((key.clone(), self.coerce(key, raw)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> StateSchema {
        let defs: BTreeMap<String, VariableDef> = serde_json::from_value(json!({
            "awake": {"type": "boolean", "default": false},
            "tries": {"type": "integer"},
            "name": {"type": "string", "default": "friend", "description": "who to greet"}
        }))
        .unwrap();
        StateSchema::from_defs(&defs).unwrap()
    }

    #[test]
    fn test_defaults_resolved() {
        let defaults = schema().defaults();
        assert_eq!(defaults["awake"], StateValue::Boolean(false));
        assert_eq!(defaults["tries"], StateValue::Integer(0));
        assert_eq!(defaults["name"], StateValue::String("friend".into()));
    }

    #[test]
    fn test_mismatched_default_rejected() {
        let mut defs = BTreeMap::new();
        defs.insert(
            "awake".to_string(),
            VariableDef::new(StateType::Boolean).with_default(json!("no")),
        );
        assert!(StateSchema::from_defs(&defs).is_err());
    }

    #[test]
    fn test_coerce_checks_presence_and_type() {
        let s = schema();
        assert_eq!(s.coerce("tries", &json!(2)).unwrap(), StateValue::Integer(2));
        assert!(matches!(
            s.coerce("tries", &json!("2")),
            Err(WaylineError::Schema(_))
        ));
        assert!(matches!(
            s.coerce("mood", &json!("ok")),
            Err(WaylineError::Schema(_))
        ));
    }

    #[test]
    fn test_coerce_all_fails_on_first_bad_key() {
        let s = schema();
        let updates = json!({"awake": true, "tries": 1.5});
        assert!(s.coerce_all(updates.as_object().unwrap()).is_err());

        let updates = json!({"awake": true, "tries": 1});
        let typed = s.coerce_all(updates.as_object().unwrap()).unwrap();
        assert_eq!(typed.len(), 2);
    }
}
