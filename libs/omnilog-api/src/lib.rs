pub mod error;
pub mod event;
pub mod handler;
pub mod payload;
pub mod service;
pub mod util;

pub use error::{ErrorKind, IngestError};
pub use event::{Event, EventAck, InboundMessage, LOG_CREATED, NoAck};
pub use handler::{EventHandler, HandleContext};
pub use payload::{LogCreatedPayload, TenantCategory};
pub use service::LogService;
pub use util::now_ms;
