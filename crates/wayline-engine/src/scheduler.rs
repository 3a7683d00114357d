use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wayline_core::config::SchedulerConfig;
use wayline_core::error::{Result, WaylineError};
use wayline_core::types::RunId;

use crate::engine::WorkflowEngine;

/// Shortest sleep between ticks, so an overdue trigger that cannot be
/// persisted does not spin the loop.
const MIN_TICK: Duration = Duration::from_millis(50);

/// Something the host observed that triggers may react to.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    /// Text the host heard or read.
    Keyword(String),
    /// State observed outside the agent, for one run.
    StatePush {
        run_id: RunId,
        updates: serde_json::Map<String, serde_json::Value>,
    },
}

/// Sending side of the scheduler's event queue.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<TriggerEvent>,
}

impl SchedulerHandle {
    pub async fn report_keyword(&self, text: impl Into<String>) -> Result<()> {
        self.send(TriggerEvent::Keyword(text.into())).await
    }

    pub async fn push_state(
        &self,
        run_id: RunId,
        updates: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.send(TriggerEvent::StatePush { run_id, updates }).await
    }

    /// Queue an event without waiting; fails when the queue is full.
    pub fn try_send(&self, event: TriggerEvent) -> Result<()> {
        self.tx
            .try_send(event)
            .map_err(|e| WaylineError::InvalidState(format!("scheduler queue: {}", e)))
    }

    async fn send(&self, event: TriggerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| WaylineError::InvalidState("trigger scheduler has stopped".to_string()))
    }
}

/// Background loop that fires time triggers and reacts to reported events.
///
/// Each tick fires every due time trigger, then sleeps until the earliest
/// next check (bounded by `max_tick_secs`). It wakes early when triggers
/// change or an event arrives.
pub struct TriggerScheduler {
    engine: Arc<WorkflowEngine>,
    rx: mpsc::Receiver<TriggerEvent>,
    max_tick: Duration,
    cancel: CancellationToken,
}

impl TriggerScheduler {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        config: &SchedulerConfig,
        cancel: CancellationToken,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let scheduler = Self {
            engine,
            rx,
            max_tick: Duration::from_secs(config.max_tick_secs.max(1)),
            cancel,
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Run the scheduler loop. Blocks until cancelled.
    pub async fn run(mut self) {
        info!(max_tick_secs = self.max_tick.as_secs(), "Trigger scheduler started");
        let mut events_open = true;

        loop {
            let now = Utc::now();
            let fired = self.engine.fire_due_triggers(now);
            if fired > 0 {
                debug!(fired, "Time triggers fired");
            }
            let delay = self.delay();

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Trigger scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
                _ = self.engine.triggers_changed().notified() => {
                    debug!("Triggers changed, rescheduling");
                }
                event = self.rx.recv(), if events_open => match event {
                    Some(event) => self.handle(event),
                    None => {
                        debug!("All scheduler handles dropped");
                        events_open = false;
                    }
                },
            }
        }
    }

    fn delay(&self) -> Duration {
        match self.engine.next_due() {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(MIN_TICK)
                .min(self.max_tick),
            None => self.max_tick,
        }
    }

    fn handle(&self, event: TriggerEvent) {
        match event {
            TriggerEvent::Keyword(text) => {
                let fired = self.engine.keyword_event(&text);
                debug!(fired, "Keyword reported");
            }
            TriggerEvent::StatePush { run_id, updates } => {
                if let Err(e) = self.engine.push_state(&run_id, &updates) {
                    warn!(run_id = %run_id, error = %e, "State push rejected");
                }
            }
        }
    }
}
