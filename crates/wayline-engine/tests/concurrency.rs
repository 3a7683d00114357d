mod common;

use std::thread;

use serde_json::json;

use common::{harness, none, updates};
use wayline_core::types::RunStatus;

#[test]
fn test_parallel_runs_do_not_interfere() {
    let h = harness();
    let runs: Vec<_> = (0..8)
        .map(|_| h.engine.start("wake", "manual", none()).unwrap())
        .collect();

    let workers: Vec<_> = runs
        .iter()
        .cloned()
        .map(|run_id| {
            let engine = h.engine.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    engine
                        .complete_step(&run_id, &updates(json!({"awake": false})), &[], None)
                        .unwrap();
                }
                engine
                    .complete_step(&run_id, &updates(json!({"awake": true})), &[], None)
                    .unwrap();
                engine.complete_step(&run_id, &none(), &[], None).unwrap()
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().unwrap().reached_end);
    }
    for run_id in &runs {
        let run = h.engine.store().get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let steps = h.engine.store().list_steps(run_id).unwrap();
        assert_eq!(steps.len(), 8);
    }
    assert!(h.engine.active_runs().is_empty());
}

#[test]
fn test_same_run_steps_serialize() {
    let h = harness();
    let run_id = h.engine.start("mood", "manual", none()).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let engine = h.engine.clone();
            let run_id = run_id.clone();
            thread::spawn(move || {
                for n in 0..10 {
                    engine
                        .push_state(&run_id, &updates(json!({"visits": i * 100 + n + 1})))
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // Every push landed on a running run and no step was invented.
    let steps = h.engine.store().list_steps(&run_id).unwrap();
    assert_eq!(steps.len(), 1);
    let live = h.engine.get_next_step(&run_id).unwrap();
    let stored = h.engine.store().load_state(&run_id).unwrap();
    assert_eq!(live.state, stored);
}
