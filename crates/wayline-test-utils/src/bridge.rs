use std::sync::Mutex;

use wayline_core::traits::HostBridge;
use wayline_core::types::RunId;

/// A request the engine made of its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    LoadTools { run_id: RunId, tools: Vec<String> },
    UnloadTools { run_id: RunId, tools: Vec<String> },
    Prompt { run_id: RunId, message: String },
}

/// Host bridge that records calls for later assertions.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Prompts sent for one run, oldest first.
    pub fn prompts_for(&self, run_id: &RunId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Prompt { run_id: r, message } if &r == run_id => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Tools most recently loaded for a run.
    pub fn loaded_for(&self, run_id: &RunId) -> Option<Vec<String>> {
        self.calls().into_iter().rev().find_map(|call| match call {
            HostCall::LoadTools { run_id: r, tools } if &r == run_id => Some(tools),
            _ => None,
        })
    }

    /// Tools most recently unloaded for a run.
    pub fn unloaded_for(&self, run_id: &RunId) -> Option<Vec<String>> {
        self.calls().into_iter().rev().find_map(|call| match call {
            HostCall::UnloadTools { run_id: r, tools } if &r == run_id => Some(tools),
            _ => None,
        })
    }
}

impl HostBridge for RecordingBridge {
    fn load_tools(&self, run_id: &RunId, tools: &[String]) {
        self.calls.lock().unwrap().push(HostCall::LoadTools {
            run_id: run_id.clone(),
            tools: tools.to_vec(),
        });
    }

    fn unload_tools(&self, run_id: &RunId, tools: &[String]) {
        self.calls.lock().unwrap().push(HostCall::UnloadTools {
            run_id: run_id.clone(),
            tools: tools.to_vec(),
        });
    }

    fn prompt_agent(&self, run_id: &RunId, message: &str) {
        self.calls.lock().unwrap().push(HostCall::Prompt {
            run_id: run_id.clone(),
            message: message.to_string(),
        });
    }
}
