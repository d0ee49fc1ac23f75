use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use omnilog_api::{Event, EventHandler, HandleContext, IngestError, LogCreatedPayload, LogService};

/// Stores the log record carried by a "log created" event.
///
/// - Malformed data: logged, reported as success (nothing to retry).
/// - Persistence failure: logged and returned to the dispatcher.
pub struct LogCreatedWorker {
    service: Arc<dyn LogService>,
}

impl LogCreatedWorker {
    pub fn new(service: Arc<dyn LogService>) -> Self {
        Self { service }
    }
}

impl EventHandler for LogCreatedWorker {
    fn name(&self) -> &str {
        "log_created"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a HandleContext,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = match LogCreatedPayload::from_data(&event.data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(
                        handler = self.name(),
                        lane = ctx.lane,
                        event_id = %event.id,
                        error = %e,
                        "failed to decode log created payload, dropping event"
                    );
                    return Ok(());
                }
            };

            tracing::info!(
                handler = self.name(),
                lane = ctx.lane,
                event_id = %event.id,
                "processing log created event"
            );

            if let Err(e) = self.service.create_log_from_event(ctx, &payload).await {
                tracing::error!(
                    handler = self.name(),
                    lane = ctx.lane,
                    event_id = %event.id,
                    error = %e,
                    "failed to create log"
                );
                return Err(e.with_context(format!("event '{}'", event.id)));
            }

            tracing::info!(handler = self.name(), event_id = %event.id, "log created");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};
    use tokio::sync::Mutex;
    use tracing_test::traced_test;

    use omnilog_api::{ErrorKind, TenantCategory};

    use super::*;

    /// Records every payload; optionally fails each call.
    #[derive(Default)]
    struct RecordingService {
        calls: Mutex<Vec<LogCreatedPayload>>,
        fail: bool,
    }

    impl LogService for RecordingService {
        fn create_log_from_event<'a>(
            &'a self,
            _ctx: &'a HandleContext,
            payload: &'a LogCreatedPayload,
        ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().await.push(payload.clone());
                if self.fail {
                    Err(IngestError::storage("error storing model for log"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn valid_data() -> Map<String, Value> {
        data(json!({
            "IpAddress": "192.168.1.1",
            "ClientHost": "localhost",
            "Provider": "example",
            "Level": 1,
            "Message": 1,
            "Description": "This is a test",
            "Resource": "test-resource",
            "Path": "/test",
            "Action": "CREATE",
            "Data": "{\"key\": \"value\"}",
            "OldData": "{\"old_key\": \"old_value\"}",
            "UserID": "12345",
            "TenantCat": [{"id": 1, "name": "Tenant A"}],
        }))
    }

    #[tokio::test]
    async fn valid_payload_is_persisted_once() {
        let service = Arc::new(RecordingService::default());
        let worker = LogCreatedWorker::new(service.clone());
        let event = Event::new("e1", "log_created", valid_data());

        worker.handle(&HandleContext::new(0, 0), &event).await.unwrap();

        let calls = service.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].ip_address, "192.168.1.1");
        assert_eq!(calls[0].action, "CREATE");
        assert_eq!(calls[0].user_id, "12345");
        assert_eq!(
            calls[0].tenant_cat,
            vec![TenantCategory { id: 1, name: "Tenant A".into() }]
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn malformed_payload_succeeds_without_persisting() {
        let service = Arc::new(RecordingService::default());
        let worker = LogCreatedWorker::new(service.clone());
        let event = Event::new("e9", "log_created", data(json!({ "InvalidField": "invalid" })));

        let result = worker.handle(&HandleContext::new(0, 0), &event).await;

        assert!(result.is_ok());
        assert!(service.calls.lock().await.is_empty());
        assert!(logs_contain("failed to decode log created payload"));
    }

    #[traced_test]
    #[tokio::test]
    async fn persistence_failure_is_returned() {
        let service = Arc::new(RecordingService {
            fail: true,
            ..Default::default()
        });
        let worker = LogCreatedWorker::new(service.clone());
        let event = Event::new("e5", "log_created", valid_data());

        let err = worker.handle(&HandleContext::new(0, 0), &event).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(err.message.contains("error storing model for log"));
        assert!(err.message.starts_with("event 'e5'"));
        assert_eq!(service.calls.lock().await.len(), 1);
        assert!(logs_contain("failed to create log"));
    }
}
