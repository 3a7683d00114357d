use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::RunId;

/// Prompt sent to the host when a `prompt_agent` trigger declares no message.
pub const DEFAULT_TRIGGER_PROMPT: &str =
    "A workflow trigger fired. Check the current workflow step and continue.";

/// Longest accepted time-trigger interval (one year).
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// A progression trigger as declared in a workflow definition.
///
/// ```json
/// {"type": "time_interval", "interval_seconds": 300,
///  "action": "prompt_agent", "message": "Still there?"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(flatten)]
    pub kind: TriggerKind,
    #[serde(default)]
    pub action: TriggerAction,
    /// Prompt text for `prompt_agent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// State merged by `update_state`.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub state_updates: serde_json::Map<String, serde_json::Value>,
}

/// What makes a trigger fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fires once per elapsed interval.
    TimeInterval { interval_seconds: u64 },
    /// Fires when observed text contains one of the phrases (case-insensitive).
    Keyword { keywords: Vec<String> },
    /// Fires when the watched state key changes value.
    StateChange { state_key: String },
}

impl TriggerKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TimeInterval { .. } => "time_interval",
            Self::Keyword { .. } => "keyword",
            Self::StateChange { .. } => "state_change",
        }
    }
}

/// What a trigger does when it fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    #[default]
    PromptAgent,
    UpdateState,
}

/// A live, per-run trigger instance derived from a [`TriggerSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrigger {
    pub id: String,
    pub run_id: RunId,
    /// Position of the spec in the workflow's `progression_triggers`.
    pub trigger_index: usize,
    pub spec: TriggerSpec,
    pub enabled: bool,
    pub fire_count: u64,
    /// Next evaluation time; only time-interval triggers carry one.
    pub next_check_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ActiveTrigger {
    pub fn new(run_id: RunId, trigger_index: usize, spec: TriggerSpec, now: DateTime<Utc>) -> Self {
        let next_check_at = match spec.kind {
            TriggerKind::TimeInterval { interval_seconds } => next_check(now, interval_seconds),
            _ => None,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            run_id,
            trigger_index,
            spec,
            enabled: true,
            fire_count: 0,
            next_check_at,
            last_fired_at: None,
            created_at: now,
        }
    }

    /// Enabled time trigger whose next check has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_check_at.is_some_and(|at| at <= now)
    }

    /// Case-insensitive phrase match. `lowered_text` must already be lowercase.
    pub fn matches_keyword(&self, lowered_text: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.spec.kind {
            TriggerKind::Keyword { keywords } => keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .any(|k| !k.is_empty() && lowered_text.contains(&k)),
            _ => false,
        }
    }

    pub fn watches(&self, key: &str) -> bool {
        self.enabled
            && matches!(&self.spec.kind, TriggerKind::StateChange { state_key } if state_key == key)
    }

    /// Count a firing and, for time triggers, schedule the next check one
    /// interval after `now`.
    pub fn record_fire(&mut self, now: DateTime<Utc>) {
        self.fire_count += 1;
        self.last_fired_at = Some(now);
        if let TriggerKind::TimeInterval { interval_seconds } = self.spec.kind {
            self.next_check_at = next_check(now, interval_seconds);
        }
    }

    pub fn prompt_message(&self) -> &str {
        self.spec.message.as_deref().unwrap_or(DEFAULT_TRIGGER_PROMPT)
    }
}

/// `now + interval`, or `None` when the interval does not fit a timestamp.
/// A time trigger without a next check never comes due.
fn next_check(now: DateTime<Utc>, interval_seconds: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(interval_seconds).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}
