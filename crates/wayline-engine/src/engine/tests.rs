use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use wayline_core::error::WaylineError;
use wayline_core::event::EventBus;
use wayline_core::state::StateValue;
use wayline_core::types::{EngineEvent, ErrorCategory, RunId, RunStatus, StepStatus};
use wayline_store::WorkflowStore;
use wayline_test_utils::{definitions_dir, RecordingBridge};

use super::*;
use crate::definitions::DefinitionStore;
use crate::graph::WorkflowDefinition;

struct Harness {
    engine: WorkflowEngine,
    bridge: Arc<RecordingBridge>,
    bus: Arc<EventBus>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = definitions_dir();
    let definitions = Arc::new(DefinitionStore::new(dir.path()));
    let store = Arc::new(WorkflowStore::in_memory().unwrap());
    let bridge = Arc::new(RecordingBridge::new());
    let bus = Arc::new(EventBus::new(256));
    let engine = WorkflowEngine::new(definitions, store, bridge.clone(), bus.clone()).unwrap();
    Harness {
        engine,
        bridge,
        bus,
        _dir: dir,
    }
}

fn map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

fn empty() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

fn status(h: &Harness, run_id: &RunId) -> RunStatus {
    h.engine.store().get_run(run_id).unwrap().unwrap().status
}

#[test]
fn test_start_records_step_zero_and_initial_state() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();

    let steps = h.engine.store().list_steps(&run_id).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].sequence, 0);
    assert_eq!(steps[0].node_id, "START");
    assert_eq!(steps[0].status, StepStatus::Started);

    let rows = h.engine.store().load_state_rows(&run_id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, StateValue::Boolean(false));
    assert_eq!(rows[0].updated_by_step, None);

    let cached = h.engine.store().list_cached_workflows().unwrap();
    assert_eq!(cached[0].id, "wake");

    assert_eq!(
        h.bridge.loaded_for(&run_id),
        Some(vec!["look".into(), "speak".into(), "set_lights".into()])
    );
    assert_eq!(h.engine.focused_run("wake"), Some(run_id.clone()));
    assert_eq!(h.engine.active_runs(), vec![run_id]);
}

#[test]
fn test_start_unknown_workflow() {
    let h = harness();
    assert!(matches!(
        h.engine.start("tango", "manual", empty()),
        Err(WaylineError::NotFound(_))
    ));
}

#[test]
fn test_trigger_data_overlays_defaults() {
    let h = harness();
    let data = map(json!({"awake": true, "source": "doorbell"}));
    let run_id = h.engine.start("wake", "doorbell", data.clone()).unwrap();

    let next = h.engine.get_next_step(&run_id).unwrap();
    assert_eq!(next.state["awake"], StateValue::Boolean(true));
    assert!(!next.state.contains_key("source"));

    let record = h.engine.store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.trigger_type, "doorbell");
    assert_eq!(record.trigger_data, data);
}

#[test]
fn test_mistyped_trigger_data_starts_nothing() {
    let h = harness();
    let result = h.engine.start("wake", "manual", map(json!({"awake": "yes"})));
    assert!(matches!(result, Err(WaylineError::Schema(_))));
    assert!(h.engine.active_runs().is_empty());
}

#[test]
fn test_conditional_start_edge() {
    let h = harness();
    let def: WorkflowDefinition = serde_json::from_value(json!({
        "id": "fork",
        "name": "Fork",
        "state_schema": {"early": {"type": "boolean", "default": false}},
        "nodes": [{"id": "a", "intent": "early path"}, {"id": "b", "intent": "late path"}],
        "edges": [
            {"source": "START", "type": "condition", "state_key": "early",
             "target": {"true": "a", "false": "b"}},
            {"source": "a", "target": "END"},
            {"source": "b", "target": "END"}
        ]
    }))
    .unwrap();
    h.engine.definitions().insert(def).unwrap();

    let late = h.engine.start("fork", "manual", empty()).unwrap();
    assert_eq!(h.engine.get_next_step(&late).unwrap().node_id, "b");

    let early = h
        .engine
        .start("fork", "manual", map(json!({"early": true})))
        .unwrap();
    assert_eq!(h.engine.get_next_step(&early).unwrap().node_id, "a");
}

#[test]
fn test_start_straight_to_end() {
    let h = harness();
    let def: WorkflowDefinition = serde_json::from_value(json!({
        "id": "noop",
        "name": "No-op",
        "nodes": [],
        "edges": [{"source": "START", "target": "END"}]
    }))
    .unwrap();
    h.engine.definitions().insert(def).unwrap();

    let run_id = h.engine.start("noop", "manual", empty()).unwrap();
    assert_eq!(status(&h, &run_id), RunStatus::Completed);
    assert!(matches!(
        h.engine.get_next_step(&run_id),
        Err(WaylineError::InvalidState(_))
    ));
    assert!(h.bridge.calls().is_empty());
}

#[test]
fn test_unschedulable_interval_never_starts() {
    let h = harness();
    let def: WorkflowDefinition = serde_json::from_value(json!({
        "id": "slow",
        "name": "Slow",
        "nodes": [{"id": "wait", "intent": "wait a very long time"}],
        "edges": [{"source": "START", "target": "wait"}],
        "progression_triggers": [
            {"type": "time_interval", "interval_seconds": 10_000_000_000_000_000u64}
        ]
    }))
    .unwrap();
    assert!(matches!(
        h.engine.definitions().insert(def),
        Err(WaylineError::Definition { .. })
    ));
    assert!(matches!(
        h.engine.start("slow", "manual", empty()),
        Err(WaylineError::NotFound(_))
    ));
    assert!(h.engine.active_runs().is_empty());
}

#[test]
fn test_schema_violation_fails_run() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();

    let result = h
        .engine
        .complete_step(&run_id, &map(json!({"awake": "yes"})), &[], None);
    assert!(matches!(result, Err(WaylineError::Schema(_))));
    assert_eq!(status(&h, &run_id), RunStatus::Failed);

    let errors = h.engine.store().list_errors(&run_id).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::State);
    assert_eq!(errors[0].step_sequence, Some(1));
    assert!(!errors[0].recoverable);

    let steps = h.engine.store().list_steps(&run_id).unwrap();
    assert_eq!(steps.last().unwrap().status, StepStatus::Failed);
    assert!(h.bridge.unloaded_for(&run_id).is_some());
    assert!(h.engine.active_runs().is_empty());
}

#[test]
fn test_undeclared_key_fails_run() {
    let h = harness();
    let run_id = h.engine.start("dance", "manual", empty()).unwrap();
    let result = h
        .engine
        .complete_step(&run_id, &map(json!({"tempo": 120})), &[], None);
    assert!(matches!(result, Err(WaylineError::Schema(_))));
    assert_eq!(status(&h, &run_id), RunStatus::Failed);
}

#[test]
fn test_node_without_edge_ends_run() {
    let h = harness();
    let run_id = h.engine.start("mood", "manual", empty()).unwrap();
    let outcome = h
        .engine
        .complete_step(&run_id, &map(json!({"mood": "sad"})), &["speak".into()], Some("meh"))
        .unwrap();
    assert_eq!(outcome.next_node_id, "comfort");
    assert!(!outcome.reached_end);

    let outcome = h.engine.complete_step(&run_id, &empty(), &[], None).unwrap();
    assert!(outcome.reached_end);
    assert_eq!(outcome.next_node_id, "END");

    let record = h.engine.store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.current_node, "END");
    assert!(record.completed_at.is_some());
}

#[test]
fn test_step_records_actions_and_observation() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();
    h.engine
        .complete_step(
            &run_id,
            &map(json!({"awake": false})),
            &["look".into()],
            Some("snoring"),
        )
        .unwrap();

    let steps = h.engine.store().list_steps(&run_id).unwrap();
    let step = &steps[1];
    assert_eq!(step.node_id, "check");
    assert_eq!(step.intent, "Look at the bed and decide whether they are awake");
    assert_eq!(step.actions_taken, vec!["look"]);
    assert_eq!(step.observed_input.as_deref(), Some("snoring"));
    assert_eq!(step.status, StepStatus::Completed);
}

#[test]
fn test_cancel() {
    let h = harness();
    let run_id = h.engine.start("nudge", "manual", empty()).unwrap();
    assert_eq!(h.engine.store().list_triggers(&run_id).unwrap().len(), 1);

    h.engine.cancel(&run_id).unwrap();
    assert_eq!(status(&h, &run_id), RunStatus::Cancelled);
    assert!(h.engine.store().list_triggers(&run_id).unwrap().is_empty());
    assert!(h.bridge.unloaded_for(&run_id).is_some());

    // Terminal: cancel is a no-op, stepping is rejected.
    h.engine.cancel(&run_id).unwrap();
    assert_eq!(status(&h, &run_id), RunStatus::Cancelled);
    assert!(matches!(
        h.engine.complete_step(&run_id, &empty(), &[], None),
        Err(WaylineError::InvalidState(_))
    ));

    assert!(matches!(
        h.engine.cancel(&RunId::from_string("ghost")),
        Err(WaylineError::NotFound(_))
    ));
}

#[test]
fn test_record_error() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();

    h.engine
        .record_error(&run_id, ErrorCategory::Vision, "camera blurry", true, Some("retry"), Some(0))
        .unwrap();
    let record = h.engine.store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.error_count, 1);
    assert_eq!(record.status, RunStatus::Running);

    assert!(matches!(
        h.engine
            .record_error(&run_id, ErrorCategory::Tool, "bad step", true, None, Some(9)),
        Err(WaylineError::NotFound(_))
    ));

    h.engine
        .record_error(&run_id, ErrorCategory::System, "motor fault", false, None, None)
        .unwrap();
    assert_eq!(status(&h, &run_id), RunStatus::Failed);

    // Finished runs still take errors.
    h.engine
        .record_error(&run_id, ErrorCategory::Human, "left the room", true, None, None)
        .unwrap();
    let record = h.engine.store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.error_count, 3);
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(h.engine.store().list_errors(&run_id).unwrap().len(), 3);

    assert!(matches!(
        h.engine.record_error(
            &RunId::from_string("ghost"),
            ErrorCategory::Unexpected,
            "?",
            true,
            None,
            None
        ),
        Err(WaylineError::NotFound(_))
    ));
}

#[test]
fn test_push_state_rejects_invalid_without_failing() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();
    assert!(matches!(
        h.engine.push_state(&run_id, &map(json!({"awake": 1}))),
        Err(WaylineError::Schema(_))
    ));
    assert_eq!(status(&h, &run_id), RunStatus::Running);
    assert!(h.engine.store().list_errors(&run_id).unwrap().is_empty());
}

#[test]
fn test_push_state_moves_run_on_condition_key() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();

    let changed = h
        .engine
        .push_state(&run_id, &map(json!({"awake": true})))
        .unwrap();
    assert_eq!(changed, vec!["awake"]);
    assert_eq!(h.engine.get_next_step(&run_id).unwrap().node_id, "greet");

    let steps = h.engine.store().list_steps(&run_id).unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].node_id, "check");
    assert_eq!(steps[1].actions_taken, vec!["push_state"]);

    let rows = h.engine.store().load_state_rows(&run_id).unwrap();
    assert_eq!(rows[0].updated_by_step, Some(1));
}

#[test]
fn test_push_state_without_move() {
    let h = harness();
    let run_id = h.engine.start("mood", "manual", empty()).unwrap();

    // Unchanged values report nothing.
    assert!(h
        .engine
        .push_state(&run_id, &map(json!({"visits": 0})))
        .unwrap()
        .is_empty());

    // Not the condition key: merged, node unchanged.
    let changed = h
        .engine
        .push_state(&run_id, &map(json!({"visits": 3})))
        .unwrap();
    assert_eq!(changed, vec!["visits"]);
    assert_eq!(h.engine.get_next_step(&run_id).unwrap().node_id, "ask");

    // Condition key without a branch: merged, no move, run still fine.
    h.engine
        .push_state(&run_id, &map(json!({"mood": "grumpy"})))
        .unwrap();
    let next = h.engine.get_next_step(&run_id).unwrap();
    assert_eq!(next.node_id, "ask");
    assert_eq!(next.state["mood"], StateValue::String("grumpy".into()));
    assert_eq!(h.engine.store().list_steps(&run_id).unwrap().len(), 1);
}

#[test]
fn test_focus_follows_latest_running_run() {
    let h = harness();
    let first = h.engine.start("wake", "manual", empty()).unwrap();
    let second = h.engine.start("wake", "manual", empty()).unwrap();
    assert_eq!(h.engine.focused_run("wake"), Some(second.clone()));

    h.engine.cancel(&second).unwrap();
    assert_eq!(h.engine.focused_run("wake"), Some(first.clone()));

    h.engine.cancel(&first).unwrap();
    assert_eq!(h.engine.focused_run("wake"), None);
}

#[test]
fn test_state_change_trigger_prompts() {
    let h = harness();
    let run_id = h.engine.start("alarm_watch", "manual", empty()).unwrap();

    h.engine
        .complete_step(&run_id, &map(json!({"awake": false})), &[], None)
        .unwrap();
    assert!(h.bridge.prompts_for(&run_id).is_empty());

    h.engine
        .complete_step(&run_id, &map(json!({"awake": false, "alarm": true})), &[], None)
        .unwrap();
    assert_eq!(h.bridge.prompts_for(&run_id), vec!["The alarm changed"]);

    let triggers = h.engine.store().list_triggers(&run_id).unwrap();
    assert_eq!(triggers[0].fire_count, 1);
}

#[test]
fn test_time_trigger_fires_once_per_interval() {
    let h = harness();
    let run_id = h.engine.start("nudge", "manual", empty()).unwrap();
    let trigger = h.engine.store().list_triggers(&run_id).unwrap().remove(0);
    let due = trigger.created_at + Duration::seconds(300);
    assert_eq!(trigger.next_check_at, Some(due));
    assert_eq!(h.engine.next_due(), Some(due));

    assert_eq!(h.engine.fire_due_triggers(due - Duration::seconds(1)), 0);
    assert_eq!(h.engine.fire_due_triggers(due), 1);
    assert_eq!(h.engine.fire_due_triggers(due), 0);
    assert_eq!(h.bridge.prompts_for(&run_id), vec!["Are they awake yet?"]);

    let trigger = h.engine.store().list_triggers(&run_id).unwrap().remove(0);
    assert_eq!(trigger.fire_count, 1);
    assert_eq!(trigger.next_check_at, Some(due + Duration::seconds(300)));
    assert_eq!(trigger.last_fired_at, Some(due));
}

#[test]
fn test_keyword_trigger_moves_run() {
    let h = harness();
    let run_id = h.engine.start("keyword_wake", "manual", empty()).unwrap();

    assert_eq!(h.engine.keyword_event("good evening"), 0);
    assert_eq!(h.engine.keyword_event("Well, GOOD MORNING to you"), 1);

    let next = h.engine.get_next_step(&run_id).unwrap();
    assert_eq!(next.node_id, "greet");
    assert_eq!(next.state["awake"], StateValue::Boolean(true));

    let trigger = h.engine.store().list_triggers(&run_id).unwrap().remove(0);
    let steps = h.engine.store().list_steps(&run_id).unwrap();
    assert_eq!(steps[1].actions_taken, vec![format!("trigger:{}", trigger.id)]);
    assert_eq!(trigger.fire_count, 1);
}

#[test]
fn test_status_reports() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", empty()).unwrap();

    match h.engine.get_status(run_id.as_str()).unwrap() {
        StatusReport::Run(report) => {
            assert_eq!(report.run.run_id, run_id);
            assert_eq!(
                report.current_intent.as_deref(),
                Some("Look at the bed and decide whether they are awake")
            );
            assert!(report.focused);
            assert_eq!(report.steps.len(), 1);
            assert_eq!(report.state.len(), 1);
        }
        other => panic!("expected run report, got {:?}", other),
    }

    for query in ["wake", "Wake Up"] {
        match h.engine.get_status(query).unwrap() {
            StatusReport::Workflow(report) => {
                assert_eq!(report.workflow.id, "wake");
                assert_eq!(report.focused_run, Some(run_id.clone()));
                assert_eq!(report.runs.len(), 1);
            }
            other => panic!("expected workflow report, got {:?}", other),
        }
    }

    assert!(matches!(
        h.engine.get_status("nothing-here"),
        Err(WaylineError::NotFound(_))
    ));
}

#[test]
fn test_events_published() {
    let h = harness();
    let mut rx = h.bus.subscribe();
    let run_id = h.engine.start("dance", "manual", empty()).unwrap();
    h.engine.complete_step(&run_id, &empty(), &[], None).unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.run_id(), &run_id);
        kinds.push(match event {
            EngineEvent::RunStarted { .. } => "started",
            EngineEvent::StepCompleted { .. } => "step",
            EngineEvent::RunCompleted { .. } => "completed",
            _ => "other",
        });
    }
    assert_eq!(kinds, vec!["started", "step", "completed"]);
}

#[test]
fn test_list_workflows() {
    let h = harness();
    let ids: Vec<String> = h.engine.list_workflows().into_iter().map(|w| w.id).collect();
    assert_eq!(
        ids,
        vec!["alarm_watch", "dance", "keyword_wake", "mood", "nudge", "wake"]
    );
}
