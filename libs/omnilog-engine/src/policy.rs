//! What the dispatcher does with an event whose handler failed.
//!
//! Either way the message is acknowledged afterwards: a failed event is
//! never redelivered by the pipeline itself.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use omnilog_api::{Event, IngestError, now_ms};

use crate::config::{ConsumerConfig, FailurePolicyKind};
use crate::error::EngineError;

/// A failed event as written to a dead-letter sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event: Event,
    pub handler: String,
    pub error_kind: String,
    pub error: String,
    pub failed_at_ms: i64,
}

impl DeadLetter {
    pub fn new(event: &Event, handler: &str, error: &IngestError) -> Self {
        Self {
            event: event.clone(),
            handler: handler.to_string(),
            error_kind: format!("{:?}", error.kind),
            error: error.message.clone(),
            failed_at_ms: now_ms(),
        }
    }
}

/// Destination for events that failed handling.
pub trait DeadLetterSink: Send + Sync {
    fn write<'a>(
        &'a self,
        letter: &'a DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>>;
}

#[derive(Clone, Default)]
pub enum FailurePolicy {
    /// Log the failure and acknowledge.
    #[default]
    AckAlways,
    /// Record the failed event in the sink, then acknowledge.
    DeadLetter(Arc<dyn DeadLetterSink>),
}

impl std::fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::AckAlways => f.write_str("AckAlways"),
            FailurePolicy::DeadLetter(_) => f.write_str("DeadLetter"),
        }
    }
}

impl FailurePolicy {
    /// Build the configured policy, opening the dead-letter file if needed.
    pub async fn from_config(config: &ConsumerConfig) -> Result<Self, EngineError> {
        match config.failure_policy {
            FailurePolicyKind::AckAlways => Ok(FailurePolicy::AckAlways),
            FailurePolicyKind::DeadLetter => {
                let path = config.dead_letter_path.as_ref().ok_or_else(|| {
                    EngineError::Config("consumer.dead-letter-path is not set".into())
                })?;
                let sink = FileDeadLetterSink::open(path).await?;
                Ok(FailurePolicy::DeadLetter(Arc::new(sink)))
            }
        }
    }

    /// Apply the policy to one failed event. Returns true when the event was
    /// dead-lettered.
    pub async fn on_failure(
        &self,
        lane: usize,
        handler: &str,
        event: &Event,
        error: &IngestError,
    ) -> bool {
        match self {
            FailurePolicy::AckAlways => false,
            FailurePolicy::DeadLetter(sink) => {
                let letter = DeadLetter::new(event, handler, error);
                match sink.write(&letter).await {
                    Ok(()) => {
                        tracing::warn!(lane, handler, event_id = %event.id, "event dead-lettered");
                        true
                    }
                    Err(e) => {
                        // The message is still acknowledged; the event is lost.
                        tracing::error!(
                            lane,
                            handler,
                            event_id = %event.id,
                            error = %e,
                            "failed to write dead letter"
                        );
                        false
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FileDeadLetterSink
// ---------------------------------------------------------------------------

/// Appends one JSON line per dead letter.
pub struct FileDeadLetterSink {
    file: Mutex<tokio::fs::File>,
}

impl FileDeadLetterSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| IngestError::config(e.to_string()).with_context(path.display()))?;
        tracing::info!(path = %path.display(), "dead-letter file opened");
        Ok(Self { file: Mutex::new(file) })
    }
}

impl DeadLetterSink for FileDeadLetterSink {
    fn write<'a>(
        &'a self,
        letter: &'a DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(letter)?;
            line.push(b'\n');
            let mut file = self.file.lock().await;
            file.write_all(&line)
                .await
                .map_err(|e| IngestError::storage(e.to_string()))?;
            file.flush()
                .await
                .map_err(|e| IngestError::storage(e.to_string()))?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryDeadLetterSink
// ---------------------------------------------------------------------------

/// Keeps dead letters in memory. Used by tests and embedded setups.
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

impl DeadLetterSink for MemoryDeadLetterSink {
    fn write<'a>(
        &'a self,
        letter: &'a DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            self.letters.lock().await.push(letter.clone());
            Ok(())
        })
    }
}
