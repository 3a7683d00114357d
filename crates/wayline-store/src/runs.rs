use rusqlite::{params, OptionalExtension, Row};

use wayline_core::error::Result;
use wayline_core::types::{RunId, RunRecord, RunStatus, WorkflowSummary};

use crate::store::{db_err, parse_enum, parse_json, parse_opt_ts, parse_ts, WorkflowStore};

const RUN_COLUMNS: &str = "run_id, workflow_id, status, trigger_type, trigger_data, current_node, started_at, completed_at, error_count";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(2)?;
    let trigger_data: String = row.get(4)?;
    let started_at: String = row.get(6)?;
    Ok(RunRecord {
        run_id: RunId(row.get(0)?),
        workflow_id: row.get(1)?,
        status: parse_enum(2, &status)?,
        trigger_type: row.get(3)?,
        trigger_data: parse_json(4, &trigger_data)?,
        current_node: row.get(5)?,
        started_at: parse_ts(6, &started_at)?,
        completed_at: parse_opt_ts(7, row.get(7)?)?,
        error_count: row.get::<_, i64>(8)? as u32,
    })
}

impl WorkflowStore {
    pub fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM workflow_runs WHERE run_id = ?1", RUN_COLUMNS),
            params![run_id.0],
            run_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Runs of one workflow, newest first.
    pub fn list_runs(&self, workflow_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workflow_runs
                 WHERE workflow_id = ?1
                 ORDER BY started_at DESC
                 LIMIT ?2",
                RUN_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![workflow_id, limit as i64], run_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// All runs in the given status, oldest first.
    pub fn list_runs_with_status(&self, status: RunStatus) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workflow_runs WHERE status = ?1 ORDER BY started_at ASC",
                RUN_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], run_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Definition metadata cached by previous runs, sorted by id.
    pub fn list_cached_workflows(&self) -> Result<Vec<WorkflowSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, author, node_count, trigger_count
                 FROM workflows ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WorkflowSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    author: row.get(3)?,
                    node_count: row.get::<_, i64>(4)? as usize,
                    trigger_count: row.get::<_, i64>(5)? as usize,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
