use crate::traits::HostBridge;
use crate::types::{EngineEvent, RunId};

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Hosts that listen on the bus receive tool and prompt requests as events.
impl HostBridge for EventBus {
    fn load_tools(&self, run_id: &RunId, tools: &[String]) {
        self.publish(EngineEvent::LoadTools {
            run_id: run_id.clone(),
            tools: tools.to_vec(),
        });
    }

    fn unload_tools(&self, run_id: &RunId, tools: &[String]) {
        self.publish(EngineEvent::UnloadTools {
            run_id: run_id.clone(),
            tools: tools.to_vec(),
        });
    }

    fn prompt_agent(&self, run_id: &RunId, message: &str) {
        self.publish(EngineEvent::PromptAgent {
            run_id: run_id.clone(),
            message: message.to_string(),
        });
    }
}
