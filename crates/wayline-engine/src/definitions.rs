use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use wayline_core::error::{Result, WaylineError};
use wayline_core::types::WorkflowSummary;

use crate::graph::{Workflow, WorkflowDefinition};

/// Loads, validates and caches workflow definitions.
///
/// Definitions live one per file as `<dir>/<workflow-id>.json`. Hosts that
/// embed the engine can also register definitions directly with
/// [`DefinitionStore::insert`].
pub struct DefinitionStore {
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<String, Arc<Workflow>>>,
}

impl DefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// A store with no backing directory.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn file_for(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.starts_with('.') {
            return None;
        }
        self.dir.as_ref().map(|d| d.join(format!("{}.json", id)))
    }

    fn cached(&self, id: &str) -> Option<Arc<Workflow>> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn remember(&self, workflow: Workflow) -> Arc<Workflow> {
        let workflow = Arc::new(workflow);
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(workflow.id.clone(), workflow.clone());
        workflow
    }

    /// Whether a definition with this id is registered or present on disk.
    pub fn exists(&self, id: &str) -> bool {
        self.cached(id).is_some() || self.file_for(id).is_some_and(|p| p.is_file())
    }

    /// Load a workflow by id, validating it on first use.
    pub fn load(&self, id: &str) -> Result<Arc<Workflow>> {
        if let Some(workflow) = self.cached(id) {
            return Ok(workflow);
        }
        let path = self
            .file_for(id)
            .ok_or_else(|| WaylineError::definition(id, "no definition source for this id"))?;
        let workflow = load_file(&path, id)?;
        debug!(workflow = %id, nodes = workflow.summary().node_count, "Workflow loaded");
        Ok(self.remember(workflow))
    }

    /// Validate and register a definition held in memory.
    pub fn insert(&self, definition: WorkflowDefinition) -> Result<Arc<Workflow>> {
        let workflow = Workflow::from_definition(definition)?;
        info!(workflow = %workflow.id, "Workflow registered");
        Ok(self.remember(workflow))
    }

    /// Summaries of every loadable workflow, sorted by id.
    ///
    /// Files that fail validation are skipped with a warning.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        let mut ids: Vec<String> = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();

        if let Some(dir) = &self.dir {
            match std::fs::read_dir(dir) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let path = entry.path();
                        if path.extension().and_then(|e| e.to_str()) != Some("json") {
                            continue;
                        }
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            ids.push(stem.to_string());
                        }
                    }
                }
                Err(e) => {
                    debug!(path = %dir.display(), error = %e, "Cannot read workflows directory");
                }
            }
        }

        ids.sort();
        ids.dedup();

        ids.iter()
            .filter_map(|id| match self.load(id) {
                Ok(workflow) => Some(workflow.summary()),
                Err(e) => {
                    warn!(workflow = %id, error = %e, "Skipping invalid workflow");
                    None
                }
            })
            .collect()
    }

    /// Look a workflow up by id, then by human name (case-insensitive).
    pub fn resolve(&self, name_or_id: &str) -> Result<Arc<Workflow>> {
        if self.exists(name_or_id) {
            return self.load(name_or_id);
        }
        let wanted = name_or_id.trim().to_lowercase();
        self.list()
            .into_iter()
            .find(|summary| summary.name.to_lowercase() == wanted)
            .map(|summary| self.load(&summary.id))
            .unwrap_or_else(|| Err(WaylineError::NotFound(format!("workflow '{}'", name_or_id))))
    }
}

/// Read and validate one definition file without caching it.
pub fn load_file(path: &Path, expected_id: &str) -> Result<Workflow> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WaylineError::definition(
                expected_id,
                format!("definition file not found: {}", path.display()),
            ));
        }
        Err(e) => {
            return Err(WaylineError::definition(
                expected_id,
                format!("cannot read {}: {}", path.display(), e),
            ));
        }
    };

    let definition: WorkflowDefinition = serde_json::from_str(&content).map_err(|e| {
        WaylineError::definition(expected_id, format!("malformed definition: {}", e))
    })?;

    if definition.id != expected_id {
        return Err(WaylineError::definition(
            expected_id,
            format!(
                "file declares id '{}' but is named '{}.json'",
                definition.id, expected_id
            ),
        ));
    }

    Workflow::from_definition(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dance() -> serde_json::Value {
        json!({
            "id": "dance",
            "name": "Dance",
            "description": "Dance once",
            "author": "robot",
            "createdAt": "2026-01-01T00:00:00Z",
            "state_schema": {},
            "nodes": [{"id": "dance", "intent": "Do a dance", "preferred_actions": ["spin"]}],
            "edges": [
                {"id": "e1", "source": "START", "target": "dance", "type": "normal"},
                {"id": "e2", "source": "dance", "target": "END", "type": "normal"}
            ]
        })
    }

    fn write(dir: &Path, name: &str, value: &serde_json::Value) {
        std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn test_load_from_file_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dance.json", &dance());
        let store = DefinitionStore::new(dir.path());

        let wf = store.load("dance").unwrap();
        assert_eq!(wf.name, "Dance");
        assert_eq!(wf.author.as_deref(), Some("robot"));
        assert_eq!(wf.created_at.as_deref(), Some("2026-01-01T00:00:00Z"));

        // Cached: still loadable after the file is gone.
        std::fs::remove_file(dir.path().join("dance.json")).unwrap();
        assert!(Arc::ptr_eq(&wf, &store.load("dance").unwrap()));
    }

    #[test]
    fn test_missing_file_is_definition_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        assert!(!store.exists("ghost"));
        assert!(matches!(
            store.load("ghost"),
            Err(WaylineError::Definition { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let store = DefinitionStore::new(dir.path());
        match store.load("bad") {
            Err(WaylineError::Definition { message, .. }) => assert!(message.contains("malformed")),
            other => panic!("unexpected {:?}", other.map(|w| w.id.clone())),
        }
    }

    #[test]
    fn test_id_must_match_file_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "other.json", &dance());
        let store = DefinitionStore::new(dir.path());
        assert!(store.load("other").is_err());
    }

    #[test]
    fn test_list_skips_invalid_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dance.json", &dance());
        let mut broken = dance();
        broken["id"] = json!("broken");
        broken["edges"] = json!([]);
        write(dir.path(), "broken.json", &broken);
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let store = DefinitionStore::new(dir.path());
        store
            .insert(serde_json::from_value({
                let mut v = dance();
                v["id"] = json!("alpha");
                v["name"] = json!("Alpha");
                v
            })
            .unwrap())
            .unwrap();

        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["alpha", "dance"]);
    }

    #[test]
    fn test_resolve_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dance.json", &dance());
        let store = DefinitionStore::new(dir.path());

        assert_eq!(store.resolve("dance").unwrap().id, "dance");
        assert_eq!(store.resolve("DANCE").unwrap().id, "dance");
        assert!(matches!(
            store.resolve("Tango"),
            Err(WaylineError::NotFound(_))
        ));
    }

    #[test]
    fn test_path_traversal_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        assert!(!store.exists("../dance"));
        assert!(store.load("../dance").is_err());
    }
}
