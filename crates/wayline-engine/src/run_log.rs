use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use wayline_core::event::EventBus;
use wayline_core::types::EngineEvent;

/// JSONL audit logger.
///
/// Subscribes to the EventBus and appends one JSON object per engine event
/// to `{log_dir}/{YYYY-MM-DD}.jsonl`, starting a new file each UTC day.
/// Lines are flushed as they are written, so a crash loses nothing already
/// logged.
pub struct RunLogger {
    log_dir: PathBuf,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a EngineEvent,
}

impl RunLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Run the logger as a background task until cancelled or the bus closes.
    pub async fn run(self, event_bus: Arc<EventBus>, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, path = %self.log_dir.display(), "Failed to create log directory");
            return;
        }

        let mut rx = event_bus.subscribe();
        let mut day = Utc::now().date_naive();
        let mut writer = match open(&self.path_for(day)).await {
            Some(w) => w,
            None => return,
        };
        info!(path = %self.path_for(day).display(), "RunLogger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let now = Utc::now();
                            if now.date_naive() != day {
                                writer.flush().await.ok();
                                day = now.date_naive();
                                writer = match open(&self.path_for(day)).await {
                                    Some(w) => w,
                                    None => return,
                                };
                            }
                            let line = match format_line(&event, now) {
                                Some(line) => line,
                                None => continue,
                            };
                            if let Err(e) = writer.write_all(line.as_bytes()).await {
                                error!(error = %e, "Failed to write log entry");
                                break;
                            }
                            if let Err(e) = writer.flush().await {
                                error!(error = %e, "Failed to flush log");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!("RunLogger finished");
    }
}

async fn open(path: &Path) -> Option<BufWriter<tokio::fs::File>> {
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(f) => Some(BufWriter::new(f)),
        Err(e) => {
            error!(error = %e, path = %path.display(), "Failed to open log file");
            None
        }
    }
}

fn format_line(event: &EngineEvent, now: chrono::DateTime<Utc>) -> Option<String> {
    let entry = LogEntry {
        timestamp: now.to_rfc3339(),
        event,
    };
    serde_json::to_string(&entry).ok().map(|json| format!("{}\n", json))
}
