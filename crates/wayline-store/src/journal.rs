use rusqlite::{params, Row};

use wayline_core::error::Result;
use wayline_core::types::{ErrorRecord, RunId, StepRecord};

use crate::store::{db_err, parse_enum, parse_json, parse_ts, WorkflowStore};

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    let actions: String = row.get(4)?;
    let before: String = row.get(6)?;
    let after: String = row.get(7)?;
    let status: String = row.get(9)?;
    let recorded_at: String = row.get(10)?;
    Ok(StepRecord {
        run_id: RunId(row.get(0)?),
        sequence: row.get::<_, i64>(1)? as u64,
        node_id: row.get(2)?,
        intent: row.get(3)?,
        actions_taken: parse_json(4, &actions)?,
        observed_input: row.get(5)?,
        state_before: parse_json(6, &before)?,
        state_after: parse_json(7, &after)?,
        duration_ms: row.get::<_, i64>(8)? as u64,
        status: parse_enum(9, &status)?,
        recorded_at: parse_ts(10, &recorded_at)?,
    })
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    let category: String = row.get(3)?;
    let occurred_at: String = row.get(7)?;
    Ok(ErrorRecord {
        id: row.get(0)?,
        run_id: RunId(row.get(1)?),
        step_sequence: row.get::<_, Option<i64>>(2)?.map(|s| s as u64),
        category: parse_enum(3, &category)?,
        message: row.get(4)?,
        recoverable: row.get(5)?,
        recovery_action: row.get(6)?,
        occurred_at: parse_ts(7, &occurred_at)?,
    })
}

impl WorkflowStore {
    /// Steps of a run in sequence order (step 0 first).
    pub fn list_steps(&self, run_id: &RunId) -> Result<Vec<StepRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, sequence, node_id, intent, actions_json, observed_input,
                        state_before, state_after, duration_ms, status, recorded_at
                 FROM workflow_steps
                 WHERE run_id = ?1
                 ORDER BY sequence ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id.0], step_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Highest recorded sequence for a run, if any step exists.
    pub fn last_step_sequence(&self, run_id: &RunId) -> Result<Option<u64>> {
        let conn = self.conn()?;
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(sequence) FROM workflow_steps WHERE run_id = ?1",
                params![run_id.0],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(max.map(|s| s as u64))
    }

    pub fn list_errors(&self, run_id: &RunId) -> Result<Vec<ErrorRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, step_sequence, category, message, recoverable, recovery_action, occurred_at
                 FROM workflow_errors
                 WHERE run_id = ?1
                 ORDER BY occurred_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id.0], error_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
