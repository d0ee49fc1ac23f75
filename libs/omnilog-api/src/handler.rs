use std::future::Future;
use std::pin::Pin;

use crate::error::IngestError;
use crate::event::Event;

/// Per-call context handed to a handler by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleContext {
    /// Dispatcher lane that owns the call (0 for a single-lane pipeline).
    pub lane: usize,
    /// When the dispatcher dequeued the message.
    pub received_at_ms: i64,
}

impl HandleContext {
    pub fn new(lane: usize, received_at_ms: i64) -> Self {
        Self { lane, received_at_ms }
    }
}

/// Processes exactly one event type (or the "unknown" fallback).
///
/// A returned error is reported by the dispatcher but never stops it, and
/// never prevents the acknowledgment of the message.
pub trait EventHandler: Send + Sync {
    /// Name used in structured logs.
    fn name(&self) -> &str;

    fn handle<'a>(
        &'a self,
        ctx: &'a HandleContext,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>>;
}
