use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use omnilog_api::IngestError;

use crate::record::LogRecord;

/// Storage backend for log records.
pub trait LogRepository: Send + Sync {
    fn create(
        &self,
        record: LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;

    fn find_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LogRecord>, IngestError>> + Send + 'a>>;
}

/// In-memory ring-buffer repository. Oldest records are evicted once
/// `max_records` is reached.
pub struct MemoryLogRepository {
    records: RwLock<VecDeque<LogRecord>>,
    max_records: usize,
}

impl MemoryLogRepository {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(max_records.min(65536))),
            max_records,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Copy of all stored records, oldest first.
    pub async fn snapshot(&self) -> Vec<LogRecord> {
        self.records.read().await.iter().cloned().collect()
    }
}

impl LogRepository for MemoryLogRepository {
    fn create(
        &self,
        record: LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        Box::pin(async move {
            if self.max_records == 0 {
                return Err(IngestError::storage("repository has zero capacity"));
            }
            let mut buf = self.records.write().await;
            if buf.len() >= self.max_records {
                buf.pop_front();
            }
            buf.push_back(record);
            Ok(())
        })
    }

    fn find_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LogRecord>, IngestError>> + Send + 'a>> {
        Box::pin(async move {
            let buf = self.records.read().await;
            Ok(buf.iter().find(|r| r.id == id).cloned())
        })
    }
}
