use rusqlite::params;

use wayline_core::error::Result;
use wayline_core::trigger::ActiveTrigger;
use wayline_core::types::RunId;

use crate::store::{db_err, parse_json, parse_opt_ts, parse_ts, WorkflowStore};

impl WorkflowStore {
    /// Live triggers of a run, in declaration order.
    pub fn list_triggers(&self, run_id: &RunId) -> Result<Vec<ActiveTrigger>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, trigger_index, spec_json, enabled, fire_count,
                        next_check_at, last_fired_at, created_at
                 FROM workflow_active_triggers
                 WHERE run_id = ?1
                 ORDER BY trigger_index ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id.0], |row| {
                let spec: String = row.get(3)?;
                let created_at: String = row.get(8)?;
                Ok(ActiveTrigger {
                    id: row.get(0)?,
                    run_id: RunId(row.get(1)?),
                    trigger_index: row.get::<_, i64>(2)? as usize,
                    spec: parse_json(3, &spec)?,
                    enabled: row.get(4)?,
                    fire_count: row.get::<_, i64>(5)? as u64,
                    next_check_at: parse_opt_ts(6, row.get(6)?)?,
                    last_fired_at: parse_opt_ts(7, row.get(7)?)?,
                    created_at: parse_ts(8, &created_at)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
