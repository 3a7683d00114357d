use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use wayline_core::error::{Result, WaylineError};
use wayline_core::state::{StateSnapshot, StateType, StateValue};
use wayline_core::types::RunId;

use crate::store::{db_err, parse_enum, parse_json, parse_ts, WorkflowStore};

/// One persisted `workflow_state` row: the current value of a key with the
/// step that last wrote it (`None` for the initial value).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRow {
    pub key: String,
    pub value: StateValue,
    pub updated_by_step: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStore {
    pub fn load_state_rows(&self, run_id: &RunId) -> Result<Vec<StateRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, value_type, value_json, updated_by_step, updated_at
                 FROM workflow_state
                 WHERE run_id = ?1
                 ORDER BY key",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id.0], |row| {
                let value_type: String = row.get(1)?;
                let value_json: String = row.get(2)?;
                let updated_at: String = row.get(4)?;
                let ty: StateType = parse_enum(1, &value_type)?;
                let raw: serde_json::Value = parse_json(2, &value_json)?;
                Ok((
                    row.get::<_, String>(0)?,
                    ty,
                    raw,
                    row.get::<_, Option<i64>>(3)?.map(|s| s as u64),
                    parse_ts(4, &updated_at)?,
                ))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (key, ty, raw, updated_by_step, updated_at) = row.map_err(db_err)?;
            let value = StateValue::from_json(ty, &raw).ok_or_else(|| {
                WaylineError::Database(format!(
                    "state value for '{}' does not match its stored type {}",
                    key, ty
                ))
            })?;
            out.push(StateRow {
                key,
                value,
                updated_by_step,
                updated_at,
            });
        }
        Ok(out)
    }

    /// Current state of a run as a snapshot.
    pub fn load_state(&self, run_id: &RunId) -> Result<StateSnapshot> {
        Ok(self
            .load_state_rows(run_id)?
            .into_iter()
            .map(|row| (row.key, row.value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunWrite;
    use wayline_core::types::{RunRecord, RunStatus};

    fn run() -> RunRecord {
        RunRecord {
            run_id: RunId::from_string("run-s"),
            workflow_id: "wake".into(),
            status: RunStatus::Running,
            trigger_type: "manual".into(),
            trigger_data: serde_json::Map::new(),
            current_node: "check".into(),
            started_at: Utc::now(),
            completed_at: None,
            error_count: 0,
        }
    }

    #[test]
    fn test_last_writer_wins_with_provenance() {
        let store = WorkflowStore::in_memory().unwrap();
        let r = run();

        let mut initial = StateSnapshot::new();
        initial.insert("awake".into(), StateValue::Boolean(false));
        initial.insert("tries".into(), StateValue::Integer(0));
        store
            .commit(&RunWrite::new().run(&r).state(&initial, None))
            .unwrap();

        let mut changed = StateSnapshot::new();
        changed.insert("awake".into(), StateValue::Boolean(true));
        store
            .commit(&RunWrite::new().run(&r).state(&changed, Some(3)))
            .unwrap();

        let rows = store.load_state_rows(&r.run_id).unwrap();
        assert_eq!(rows.len(), 2);
        let awake = rows.iter().find(|row| row.key == "awake").unwrap();
        assert_eq!(awake.value, StateValue::Boolean(true));
        assert_eq!(awake.updated_by_step, Some(3));
        let tries = rows.iter().find(|row| row.key == "tries").unwrap();
        assert_eq!(tries.updated_by_step, None);

        let snapshot = store.load_state(&r.run_id).unwrap();
        assert_eq!(snapshot["awake"], StateValue::Boolean(true));
        assert_eq!(snapshot["tries"], StateValue::Integer(0));
    }

    #[test]
    fn test_object_values_roundtrip() {
        let store = WorkflowStore::in_memory().unwrap();
        let r = run();
        let mut state = StateSnapshot::new();
        let obj = serde_json::json!({"room": "kitchen", "lux": 300});
        state.insert(
            "scene".into(),
            StateValue::Object(obj.as_object().cloned().unwrap()),
        );
        store.commit(&RunWrite::new().run(&r).state(&state, None)).unwrap();

        let loaded = store.load_state(&r.run_id).unwrap();
        assert_eq!(loaded["scene"].to_json(), obj);
    }
}
