use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use wayline_core::error::{Result, WaylineError};
use wayline_core::state::StateValue;
use wayline_core::trigger::ActiveTrigger;
use wayline_core::types::{ErrorRecord, RunRecord, StepRecord, WorkflowSummary};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        author TEXT,
        node_count INTEGER NOT NULL,
        trigger_count INTEGER NOT NULL,
        cached_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS workflow_runs (
        run_id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        trigger_type TEXT NOT NULL,
        trigger_data TEXT NOT NULL DEFAULT '{}',
        current_node TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        error_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_runs_workflow
        ON workflow_runs(workflow_id, started_at DESC);
    CREATE INDEX IF NOT EXISTS idx_runs_status
        ON workflow_runs(status);

    CREATE TABLE IF NOT EXISTS workflow_steps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL REFERENCES workflow_runs(run_id),
        sequence INTEGER NOT NULL,
        node_id TEXT NOT NULL,
        intent TEXT NOT NULL,
        actions_json TEXT NOT NULL DEFAULT '[]',
        observed_input TEXT,
        state_before TEXT NOT NULL,
        state_after TEXT NOT NULL,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        UNIQUE (run_id, sequence)
    );

    CREATE TABLE IF NOT EXISTS workflow_errors (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL REFERENCES workflow_runs(run_id),
        step_sequence INTEGER,
        category TEXT NOT NULL,
        message TEXT NOT NULL,
        recoverable INTEGER NOT NULL,
        recovery_action TEXT,
        occurred_at TEXT NOT NULL,
        FOREIGN KEY (run_id, step_sequence) REFERENCES workflow_steps(run_id, sequence)
    );

    CREATE INDEX IF NOT EXISTS idx_errors_run
        ON workflow_errors(run_id, occurred_at);

    CREATE TABLE IF NOT EXISTS workflow_state (
        run_id TEXT NOT NULL REFERENCES workflow_runs(run_id),
        key TEXT NOT NULL,
        value_type TEXT NOT NULL,
        value_json TEXT NOT NULL,
        updated_by_step INTEGER,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (run_id, key)
    );

    CREATE TABLE IF NOT EXISTS workflow_active_triggers (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL REFERENCES workflow_runs(run_id),
        trigger_index INTEGER NOT NULL,
        trigger_type TEXT NOT NULL,
        spec_json TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        fire_count INTEGER NOT NULL DEFAULT 0,
        next_check_at TEXT,
        last_fired_at TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_triggers_run
        ON workflow_active_triggers(run_id);";

/// SQLite-backed persistence for workflow runs.
pub struct WorkflowStore {
    conn: Mutex<Connection>,
}

/// A batch of writes for one run, committed in a single transaction.
///
/// Rows are written in dependency order: run, step, state, error, triggers.
#[derive(Debug, Default, Clone)]
pub struct RunWrite {
    pub run: Option<RunRecord>,
    pub step: Option<StepRecord>,
    /// Changed state values, stamped with `state_step` as provenance.
    pub state: Vec<(String, StateValue)>,
    pub state_step: Option<u64>,
    pub error: Option<ErrorRecord>,
    /// Triggers to insert or update.
    pub triggers: Vec<ActiveTrigger>,
    /// Delete every active trigger of the run (it left `running`).
    pub clear_triggers: bool,
}

impl RunWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, run: &RunRecord) -> Self {
        self.run = Some(run.clone());
        self
    }

    pub fn step(mut self, step: &StepRecord) -> Self {
        self.step = Some(step.clone());
        self
    }

    pub fn state<'a>(
        mut self,
        values: impl IntoIterator<Item = (&'a String, &'a StateValue)>,
        by_step: Option<u64>,
    ) -> Self {
        self.state = values
            .into_iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.state_step = by_step;
        self
    }

    pub fn error(mut self, error: &ErrorRecord) -> Self {
        self.error = Some(error.clone());
        self
    }

    pub fn triggers(mut self, triggers: &[ActiveTrigger]) -> Self {
        self.triggers = triggers.to_vec();
        self
    }

    pub fn clear_triggers(mut self) -> Self {
        self.clear_triggers = true;
        self
    }
}

impl WorkflowStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WaylineError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        let store = Self::init(conn)?;
        debug!(path = %path.display(), "Workflow store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WaylineError::Database(e.to_string()))
    }

    /// Cache definition metadata in the `workflows` table.
    pub fn upsert_workflow(&self, summary: &WorkflowSummary) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO workflows (id, name, description, author, node_count, trigger_count, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 author = excluded.author,
                 node_count = excluded.node_count,
                 trigger_count = excluded.trigger_count,
                 cached_at = excluded.cached_at",
            params![
                summary.id,
                summary.name,
                summary.description,
                summary.author,
                summary.node_count as i64,
                summary.trigger_count as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Commit a batch of writes for one run atomically.
    pub fn commit(&self, write: &RunWrite) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        if let Some(ref run) = write.run {
            upsert_run(&tx, run)?;
        }
        if let Some(ref step) = write.step {
            insert_step(&tx, step)?;
        }
        if !write.state.is_empty() {
            let run_id = write
                .run
                .as_ref()
                .map(|r| r.run_id.0.clone())
                .or_else(|| write.step.as_ref().map(|s| s.run_id.0.clone()))
                .ok_or_else(|| {
                    WaylineError::Database("state write without a run or step".to_string())
                })?;
            let now = Utc::now().to_rfc3339();
            for (key, value) in &write.state {
                tx.execute(
                    "INSERT INTO workflow_state (run_id, key, value_type, value_json, updated_by_step, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(run_id, key) DO UPDATE SET
                         value_type = excluded.value_type,
                         value_json = excluded.value_json,
                         updated_by_step = excluded.updated_by_step,
                         updated_at = excluded.updated_at",
                    params![
                        run_id,
                        key,
                        value.state_type().to_string(),
                        value.to_json().to_string(),
                        write.state_step.map(|s| s as i64),
                        now,
                    ],
                )
                .map_err(db_err)?;
            }
        }
        if let Some(ref error) = write.error {
            insert_error(&tx, error)?;
        }
        if write.clear_triggers {
            if let Some(ref run) = write.run {
                tx.execute(
                    "DELETE FROM workflow_active_triggers WHERE run_id = ?1",
                    params![run.run_id.0],
                )
                .map_err(db_err)?;
            }
        } else {
            for trigger in &write.triggers {
                upsert_trigger(&tx, trigger)?;
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }
}

fn upsert_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO workflow_runs (run_id, workflow_id, status, trigger_type, trigger_data, current_node, started_at, completed_at, error_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(run_id) DO UPDATE SET
             status = excluded.status,
             current_node = excluded.current_node,
             completed_at = excluded.completed_at,
             error_count = excluded.error_count",
        params![
            run.run_id.0,
            run.workflow_id,
            run.status.as_str(),
            run.trigger_type,
            serde_json::Value::Object(run.trigger_data.clone()).to_string(),
            run.current_node,
            run.started_at.to_rfc3339(),
            run.completed_at.map(|t| t.to_rfc3339()),
            run.error_count as i64,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_step(conn: &Connection, step: &StepRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO workflow_steps (run_id, sequence, node_id, intent, actions_json, observed_input, state_before, state_after, duration_ms, status, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            step.run_id.0,
            step.sequence as i64,
            step.node_id,
            step.intent,
            serde_json::to_string(&step.actions_taken)?,
            step.observed_input,
            serde_json::to_string(&step.state_before)?,
            serde_json::to_string(&step.state_after)?,
            step.duration_ms as i64,
            step.status.as_str(),
            step.recorded_at.to_rfc3339(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_error(conn: &Connection, error: &ErrorRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO workflow_errors (id, run_id, step_sequence, category, message, recoverable, recovery_action, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            error.id,
            error.run_id.0,
            error.step_sequence.map(|s| s as i64),
            error.category.as_str(),
            error.message,
            error.recoverable,
            error.recovery_action,
            error.occurred_at.to_rfc3339(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn upsert_trigger(conn: &Connection, trigger: &ActiveTrigger) -> Result<()> {
    conn.execute(
        "INSERT INTO workflow_active_triggers (id, run_id, trigger_index, trigger_type, spec_json, enabled, fire_count, next_check_at, last_fired_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             enabled = excluded.enabled,
             fire_count = excluded.fire_count,
             next_check_at = excluded.next_check_at,
             last_fired_at = excluded.last_fired_at",
        params![
            trigger.id,
            trigger.run_id.0,
            trigger.trigger_index as i64,
            trigger.spec.kind.label(),
            serde_json::to_string(&trigger.spec)?,
            trigger.enabled,
            trigger.fire_count as i64,
            trigger.next_check_at.map(|t| t.to_rfc3339()),
            trigger.last_fired_at.map(|t| t.to_rfc3339()),
            trigger.created_at.to_rfc3339(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub(crate) fn db_err(e: rusqlite::Error) -> WaylineError {
    WaylineError::Database(e.to_string())
}

/// Parse a stored RFC 3339 timestamp inside a row mapper.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

/// Decode a JSON column inside a row mapper.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Decode an enum stored by its string form inside a row mapper.
pub(crate) fn parse_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = WaylineError>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
