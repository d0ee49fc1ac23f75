use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use omnilog_api::{HandleContext, IngestError, LogCreatedPayload, LogService};

use crate::record::LogRecord;
use crate::repository::LogRepository;

/// Persistence port backed by a [`LogRepository`].
///
/// Maps the event payload to a [`LogRecord`] (fresh id, tenant ids extracted
/// from the tenant categories) and stores it. Repository failures are reported
/// as storage errors; nothing is retried.
pub struct DefaultLogService {
    repo: Arc<dyn LogRepository>,
}

impl DefaultLogService {
    pub fn new(repo: Arc<dyn LogRepository>) -> Self {
        Self { repo }
    }
}

impl LogService for DefaultLogService {
    fn create_log_from_event<'a>(
        &'a self,
        ctx: &'a HandleContext,
        payload: &'a LogCreatedPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            let record = LogRecord::from_payload(payload).map_err(|e| {
                tracing::error!(lane = ctx.lane, error = %e, "failed to map payload to log record");
                e
            })?;
            let record_id = record.id.clone();

            self.repo.create(record).await.map_err(|e| {
                tracing::error!(lane = ctx.lane, error = %e, "failed to store log record");
                IngestError::storage(format!("error storing model for log: {}", e.message))
            })?;

            tracing::debug!(lane = ctx.lane, record_id = %record_id, "stored log record");
            Ok(())
        })
    }
}
