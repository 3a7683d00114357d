use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use wayline_core::error::Result;
use wayline_core::state::StateSnapshot;
use wayline_core::trigger::TriggerAction;
use wayline_core::types::{EngineEvent, StepStatus};
use wayline_store::RunWrite;

use super::live::LiveRun;
use super::{lock, WorkflowEngine};

impl WorkflowEngine {
    /// Fire every enabled time trigger whose next check is at or before
    /// `now`. Returns the number of firings.
    pub fn fire_due_triggers(&self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        for handle in self.live_handles() {
            let mut run = lock(&handle);
            for index in 0..run.triggers.len() {
                if !run.is_running() {
                    break;
                }
                if !run.triggers.get(index).is_some_and(|t| t.is_due(now)) {
                    continue;
                }
                fired += 1;
                if let Err(e) = self.fire_trigger(&mut run, index, now) {
                    warn!(run_id = %run.record.run_id, error = %e, "Time trigger failed");
                }
            }
        }
        fired
    }

    /// Match observed text against keyword triggers of every running run.
    /// Returns the number of firings.
    pub fn keyword_event(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        let now = Utc::now();
        let mut fired = 0;
        for handle in self.live_handles() {
            let mut run = lock(&handle);
            for index in 0..run.triggers.len() {
                if !run.is_running() {
                    break;
                }
                if !run
                    .triggers
                    .get(index)
                    .is_some_and(|t| t.matches_keyword(&lowered))
                {
                    continue;
                }
                fired += 1;
                if let Err(e) = self.fire_trigger(&mut run, index, now) {
                    warn!(run_id = %run.record.run_id, error = %e, "Keyword trigger failed");
                }
            }
        }
        debug!(fired, "Keyword event handled");
        fired
    }

    /// Earliest next check across enabled time triggers.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.live_handles()
            .iter()
            .filter_map(|handle| {
                let run = lock(handle);
                let earliest = run
                    .triggers
                    .iter()
                    .filter(|t| t.enabled)
                    .filter_map(|t| t.next_check_at)
                    .min();
                earliest
            })
            .min()
    }

    /// Run state-change triggers watching any of `changed`. Whatever these
    /// triggers merge does not fire further state-change triggers.
    pub(super) fn fire_state_triggers(&self, run: &mut LiveRun, changed: &[String], now: DateTime<Utc>) {
        for index in 0..run.triggers.len() {
            if !run.is_running() {
                break;
            }
            let watching = run
                .triggers
                .get(index)
                .is_some_and(|t| changed.iter().any(|key| t.watches(key)));
            if !watching {
                continue;
            }
            if let Err(e) = self.fire_trigger(run, index, now) {
                warn!(run_id = %run.record.run_id, error = %e, "State-change trigger failed");
            }
        }
    }

    /// Count a firing, persist it, then run the trigger's action.
    fn fire_trigger(&self, run: &mut LiveRun, index: usize, now: DateTime<Utc>) -> Result<Vec<String>> {
        let Some(mut trigger) = run.triggers.get(index).cloned() else {
            return Ok(vec![]);
        };
        trigger.record_fire(now);
        self.store.commit(
            &RunWrite::new()
                .run(&run.record)
                .triggers(std::slice::from_ref(&trigger)),
        )?;
        run.triggers[index] = trigger.clone();

        let run_id = run.record.run_id.clone();
        info!(
            run_id = %run_id,
            trigger = %trigger.id,
            kind = trigger.spec.kind.label(),
            fire_count = trigger.fire_count,
            "Trigger fired"
        );
        self.events.publish(EngineEvent::TriggerFired {
            run_id: run_id.clone(),
            trigger_id: trigger.id.clone(),
            kind: trigger.spec.kind.label().to_string(),
            fire_count: trigger.fire_count,
        });

        match trigger.spec.action {
            TriggerAction::PromptAgent => {
                self.host.prompt_agent(&run_id, trigger.prompt_message());
                Ok(vec![])
            }
            TriggerAction::UpdateState => {
                let typed = run.workflow.schema().coerce_all(&trigger.spec.state_updates)?;
                self.merge_update(run, typed, &format!("trigger:{}", trigger.id), now)
            }
        }
    }

    /// Merge typed values into a run without completing its node.
    ///
    /// The run only moves when a changed key is the condition of the current
    /// node's outgoing edge and the edge now resolves to a different node;
    /// that move is recorded as a step whose action is `actor`.
    pub(super) fn merge_update(
        &self,
        run: &mut LiveRun,
        typed: StateSnapshot,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut after = run.state.clone();
        let changed = after.merge(typed);
        if changed.is_empty() {
            return Ok(changed);
        }

        let node_id = run.record.current_node.clone();
        let advance_to = run
            .workflow
            .transition_from(&node_id)
            .filter(|t| {
                t.condition_key()
                    .is_some_and(|key| changed.iter().any(|c| c == key))
            })
            .and_then(|t| t.resolve(&node_id, after.snapshot()).ok())
            .filter(|target| *target != node_id)
            .map(str::to_string);

        match advance_to {
            Some(next) => {
                let sequence = run.last_sequence + 1;
                let step = run.step_record(
                    sequence,
                    vec![actor.to_string()],
                    None,
                    &after,
                    StepStatus::Completed,
                    now,
                );
                info!(run_id = %run.record.run_id, from = %node_id, to = %next, actor, "State update moved run");
                self.advance(run, step, after, &changed, &next, now)?;
            }
            None => {
                self.store.commit(
                    &RunWrite::new()
                        .run(&run.record)
                        .state(after.select(&changed), Some(run.last_sequence)),
                )?;
                run.state = after;
                debug!(run_id = %run.record.run_id, keys = ?changed, actor, "State merged");
                self.events.publish(EngineEvent::StateChanged {
                    run_id: run.record.run_id.clone(),
                    keys: changed.clone(),
                });
            }
        }
        Ok(changed)
    }
}
