#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use wayline_core::event::EventBus;
use wayline_engine::{DefinitionStore, WorkflowEngine};
use wayline_store::WorkflowStore;
use wayline_test_utils::{definitions_dir, RecordingBridge};

pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub bridge: Arc<RecordingBridge>,
    pub bus: Arc<EventBus>,
    pub dir: tempfile::TempDir,
}

/// Engine over every fixture with an in-memory store.
pub fn harness() -> Harness {
    let dir = definitions_dir();
    let store = Arc::new(WorkflowStore::in_memory().unwrap());
    build(dir, store)
}

/// Engine over every fixture with a database file inside the fixture dir.
pub fn file_harness() -> Harness {
    let dir = definitions_dir();
    let store = Arc::new(WorkflowStore::open(&dir.path().join("wayline.db")).unwrap());
    build(dir, store)
}

/// A second engine over the same definitions and database file, as after a
/// process restart.
pub fn reopen(dir: &Path) -> (Arc<WorkflowEngine>, Arc<RecordingBridge>) {
    let store = Arc::new(WorkflowStore::open(&dir.join("wayline.db")).unwrap());
    let bridge = Arc::new(RecordingBridge::new());
    let engine = WorkflowEngine::new(
        Arc::new(DefinitionStore::new(dir)),
        store,
        bridge.clone(),
        Arc::new(EventBus::default()),
    )
    .unwrap();
    (Arc::new(engine), bridge)
}

fn build(dir: tempfile::TempDir, store: Arc<WorkflowStore>) -> Harness {
    let bridge = Arc::new(RecordingBridge::new());
    let bus = Arc::new(EventBus::new(256));
    let engine = WorkflowEngine::new(
        Arc::new(DefinitionStore::new(dir.path())),
        store,
        bridge.clone(),
        bus.clone(),
    )
    .unwrap();
    Harness {
        engine: Arc::new(engine),
        bridge,
        bus,
        dir,
    }
}

pub fn updates(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

pub fn none() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}
