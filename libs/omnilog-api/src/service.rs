use std::future::Future;
use std::pin::Pin;

use crate::error::IngestError;
use crate::handler::HandleContext;
use crate::payload::LogCreatedPayload;

/// Persistence port: stores one log record per call.
///
/// No retry contract: a failure is returned once and the caller decides.
/// Implementations are not assumed to be idempotent.
pub trait LogService: Send + Sync {
    fn create_log_from_event<'a>(
        &'a self,
        ctx: &'a HandleContext,
        payload: &'a LogCreatedPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>>;
}
