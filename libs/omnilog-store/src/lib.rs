pub mod record;
pub mod repository;
pub mod service;

pub use record::LogRecord;
pub use repository::{LogRepository, MemoryLogRepository};
pub use service::DefaultLogService;
