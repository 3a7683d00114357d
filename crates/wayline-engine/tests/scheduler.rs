mod common;

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{harness, none, updates};
use wayline_core::config::SchedulerConfig;
use wayline_core::types::EngineEvent;
use wayline_engine::{TriggerScheduler, WorkflowDefinition};

async fn wait_for<F>(check: F) -> bool
where
    F: FnMut() -> bool,
{
    wait_up_to(200, check).await
}

async fn wait_up_to<F>(ticks: usize, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..ticks {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_keyword_reported_through_handle() {
    let h = harness();
    let run_id = h.engine.start("keyword_wake", "manual", none()).unwrap();
    let cancel = CancellationToken::new();
    let (scheduler, handle) =
        TriggerScheduler::new(h.engine.clone(), &SchedulerConfig::default(), cancel.clone());
    let task = tokio::spawn(scheduler.run());

    handle.report_keyword("oh, good morning!").await.unwrap();
    let engine = h.engine.clone();
    let id = run_id.clone();
    assert!(
        wait_for(move || engine
            .get_next_step(&id)
            .map(|n| n.node_id == "greet")
            .unwrap_or(false))
        .await
    );

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_state_push_through_handle() {
    let h = harness();
    let run_id = h.engine.start("wake", "manual", none()).unwrap();
    let mut rx = h.bus.subscribe();
    let cancel = CancellationToken::new();
    let (scheduler, handle) =
        TriggerScheduler::new(h.engine.clone(), &SchedulerConfig::default(), cancel.clone());
    let task = tokio::spawn(scheduler.run());

    handle
        .push_state(run_id.clone(), updates(json!({"awake": true})))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(EngineEvent::StepCompleted { next_node, .. }) => return next_node,
                Ok(_) => continue,
                Err(e) => panic!("bus error: {}", e),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, "greet");

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_scheduler_stops_on_cancel() {
    let h = harness();
    let cancel = CancellationToken::new();
    let config = SchedulerConfig {
        max_tick_secs: 60,
        ..SchedulerConfig::default()
    };
    let (scheduler, _handle) = TriggerScheduler::new(h.engine.clone(), &config, cancel.clone());
    let task = tokio::spawn(scheduler.run());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_handle_fails_after_scheduler_stops() {
    let h = harness();
    let cancel = CancellationToken::new();
    let (scheduler, handle) =
        TriggerScheduler::new(h.engine.clone(), &SchedulerConfig::default(), cancel.clone());
    let task = tokio::spawn(scheduler.run());
    cancel.cancel();
    task.await.unwrap();

    assert!(handle.report_keyword("good morning").await.is_err());
}

#[tokio::test]
async fn test_sleeps_only_until_next_due_trigger() {
    let h = harness();
    let def: WorkflowDefinition = serde_json::from_value(json!({
        "id": "blink",
        "name": "Blink",
        "nodes": [{"id": "watch", "intent": "keep watching"}],
        "edges": [{"source": "START", "target": "watch"}],
        "progression_triggers": [
            {"type": "time_interval", "interval_seconds": 1, "message": "still watching?"}
        ]
    }))
    .unwrap();
    h.engine.definitions().insert(def).unwrap();
    let run_id = h.engine.start("blink", "manual", none()).unwrap();

    // A minute-long tick cap: the firing must come from the next-due wakeup.
    let cancel = CancellationToken::new();
    let config = SchedulerConfig {
        max_tick_secs: 60,
        ..SchedulerConfig::default()
    };
    let (scheduler, _handle) = TriggerScheduler::new(h.engine.clone(), &config, cancel.clone());
    let task = tokio::spawn(scheduler.run());

    let bridge = h.bridge.clone();
    let id = run_id.clone();
    assert!(wait_up_to(500, move || !bridge.prompts_for(&id).is_empty()).await);
    assert_eq!(h.bridge.prompts_for(&run_id)[0], "still watching?");

    let trigger = h.engine.store().list_triggers(&run_id).unwrap().remove(0);
    assert!(trigger.fire_count >= 1);
    assert!(trigger.next_check_at > trigger.last_fired_at);

    cancel.cancel();
    task.await.unwrap();
}
