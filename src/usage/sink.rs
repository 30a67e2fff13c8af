//! Usage sinks
//!
//! The JSON-lines sink queues facts on a bounded channel; a background task
//! appends them to the usage log so request handlers never wait on disk.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{UsageFact, UsageSink};

/// Facts buffered before new ones are dropped
const CHANNEL_BUFFER: usize = 10_000;

/// Appends one JSON object per line to a file
pub struct JsonLinesUsageSink {
    sender: mpsc::Sender<UsageFact>,
}

impl JsonLinesUsageSink {
    /// Open (or create) the log and spawn the writer task.
    pub async fn spawn(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER);
        tokio::spawn(Self::background_worker(file, path, receiver));

        Ok(Self { sender })
    }

    async fn background_worker(
        mut file: tokio::fs::File,
        path: PathBuf,
        mut receiver: mpsc::Receiver<UsageFact>,
    ) {
        info!(path = %path.display(), "Starting usage log writer");

        while let Some(fact) = receiver.recv().await {
            let mut line = match serde_json::to_vec(&fact) {
                Ok(line) => line,
                Err(e) => {
                    error!(request_id = %fact.request_id, error = %e, "Failed to serialize usage fact");
                    continue;
                }
            };
            line.push(b'\n');

            if let Err(e) = file.write_all(&line).await {
                error!(path = %path.display(), error = %e, "Failed to append usage fact");
                continue;
            }
            if let Err(e) = file.flush().await {
                warn!(path = %path.display(), error = %e, "Failed to flush usage log");
            }
            debug!(request_id = %fact.request_id, "Usage fact written");
        }

        info!("Usage log writer shutting down");
    }
}

impl UsageSink for JsonLinesUsageSink {
    fn record(&self, fact: UsageFact) {
        if let Err(e) = self.sender.try_send(fact) {
            match e {
                mpsc::error::TrySendError::Full(fact) => {
                    warn!(request_id = %fact.request_id, "Usage channel full, dropping fact");
                }
                mpsc::error::TrySendError::Closed(fact) => {
                    error!(request_id = %fact.request_id, "Usage channel closed, dropping fact");
                }
            }
        }
    }
}

/// Emits each fact as a JSON line on the `usage` tracing target
#[derive(Debug, Default)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, fact: UsageFact) {
        match serde_json::to_string(&fact) {
            Ok(line) => info!(target: "usage", "{}", line),
            Err(e) => warn!(request_id = %fact.request_id, error = %e, "Failed to serialize usage fact"),
        }
    }
}

/// Keeps facts in memory for assertions
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemoryUsageSink {
    facts: std::sync::Mutex<Vec<UsageFact>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryUsageSink {
    pub fn facts(&self) -> Vec<UsageFact> {
        self.facts
            .lock()
            .map(|facts| facts.clone())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl UsageSink for MemoryUsageSink {
    fn record(&self, fact: UsageFact) {
        if let Ok(mut facts) = self.facts.lock() {
            facts.push(fact);
        }
    }
}
