use std::future::Future;
use std::pin::Pin;

use omnilog_api::{Event, EventHandler, HandleContext, IngestError};

/// Fallback handler for event types nobody registered.
///
/// Logs that the type is unsupported and reports success, so unfamiliar
/// producers never fail the dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWorker;

impl DefaultWorker {
    pub fn new() -> Self {
        Self
    }
}

impl EventHandler for DefaultWorker {
    fn name(&self) -> &str {
        "default"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a HandleContext,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                handler = self.name(),
                lane = ctx.lane,
                event_id = %event.id,
                event_type = %event.event_type,
                "event type is not supported, ignoring"
            );
            Ok(())
        })
    }
}
