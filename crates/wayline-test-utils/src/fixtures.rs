use std::path::Path;

use serde_json::{json, Value};

/// `START → dance → END`, no state.
pub fn dance() -> Value {
    json!({
        "id": "dance",
        "name": "Little Dance",
        "description": "Play a song and dance once",
        "author": "wayline",
        "createdAt": "2026-01-01T00:00:00Z",
        "state_schema": {},
        "nodes": [
            {"id": "dance", "intent": "Play music and do a short dance",
             "preferred_actions": ["play_music", "spin"]}
        ],
        "edges": [
            {"id": "e1", "source": "START", "target": "dance", "type": "normal"},
            {"id": "e2", "source": "dance", "target": "END", "type": "normal"}
        ]
    })
}

/// `check` loops on itself until `awake` is true, then `greet → END`.
pub fn wake() -> Value {
    json!({
        "id": "wake",
        "name": "Wake Up",
        "description": "Check until the person is awake, then greet them",
        "author": "wayline",
        "createdAt": "2026-01-01T00:00:00Z",
        "state_schema": {
            "awake": {"type": "boolean", "default": false, "description": "person is awake"}
        },
        "nodes": [
            {"id": "check", "intent": "Look at the bed and decide whether they are awake",
             "preferred_actions": ["look"]},
            {"id": "greet", "intent": "Say good morning",
             "preferred_actions": ["speak", "look"]}
        ],
        "edges": [
            {"id": "e1", "source": "START", "target": "check", "type": "normal"},
            {"id": "e2", "source": "check", "type": "condition", "state_key": "awake",
             "target": {"true": "greet", "false": "check"}},
            {"id": "e3", "source": "greet", "target": "END", "type": "normal"}
        ],
        "custom_tools": ["set_lights"]
    })
}

/// [`wake`] with a 300 second reminder prompt.
pub fn nudge() -> Value {
    let mut def = wake();
    def["id"] = json!("nudge");
    def["name"] = json!("Nudge");
    def["progression_triggers"] = json!([
        {"type": "time_interval", "interval_seconds": 300,
         "action": "prompt_agent", "message": "Are they awake yet?"}
    ]);
    def
}

/// [`wake`] where hearing "good morning" marks the person awake.
pub fn keyword_wake() -> Value {
    let mut def = wake();
    def["id"] = json!("keyword_wake");
    def["name"] = json!("Keyword Wake");
    def["progression_triggers"] = json!([
        {"type": "keyword", "keywords": ["Good Morning"],
         "action": "update_state", "state_updates": {"awake": true}}
    ]);
    def
}

/// [`wake`] with an `alarm` flag whose changes prompt the agent.
pub fn alarm_watch() -> Value {
    let mut def = wake();
    def["id"] = json!("alarm_watch");
    def["name"] = json!("Alarm Watch");
    def["state_schema"]["alarm"] = json!({"type": "boolean", "default": false});
    def["progression_triggers"] = json!([
        {"type": "state_change", "state_key": "alarm", "message": "The alarm changed"}
    ]);
    def
}

/// `ask` branches on a string mood with no branch for most values.
pub fn mood() -> Value {
    json!({
        "id": "mood",
        "name": "Mood",
        "description": "React to the person's mood",
        "state_schema": {
            "mood": {"type": "string", "default": "calm"},
            "visits": {"type": "integer", "default": 0}
        },
        "nodes": [
            {"id": "ask", "intent": "Ask how they feel", "preferred_actions": ["speak"]},
            {"id": "cheer", "intent": "Play something upbeat", "preferred_actions": ["play_music"]},
            {"id": "comfort", "intent": "Offer comfort", "preferred_actions": ["speak"]}
        ],
        "edges": [
            {"id": "e1", "source": "START", "target": "ask", "type": "normal"},
            {"id": "e2", "source": "ask", "type": "condition", "state_key": "mood",
             "target": {"happy": "cheer", "sad": "comfort"}},
            {"id": "e3", "source": "cheer", "target": "END", "type": "normal"}
        ]
    })
}

/// Every fixture above.
pub fn all() -> Vec<Value> {
    vec![dance(), wake(), nudge(), keyword_wake(), alarm_watch(), mood()]
}

/// Write definitions as `<id>.json` files into `dir`.
pub fn write_definitions(dir: &Path, definitions: &[Value]) {
    std::fs::create_dir_all(dir).unwrap();
    for def in definitions {
        let id = def["id"].as_str().unwrap();
        std::fs::write(
            dir.join(format!("{}.json", id)),
            serde_json::to_string_pretty(def).unwrap(),
        )
        .unwrap();
    }
}

/// A temporary directory holding every fixture.
pub fn definitions_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_definitions(dir.path(), &all());
    dir
}
