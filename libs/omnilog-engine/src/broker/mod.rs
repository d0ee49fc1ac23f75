//! Broker clients: the producer side of the event buffer.

mod memory;
mod tcp;

pub use memory::MemoryBroker;
pub use tcp::TcpLineBroker;

use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use omnilog_api::IngestError;

use crate::buffer::BufferSender;

/// What the pipeline subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub group: String,
    pub topics: Vec<String>,
    /// Buffer capacity the client is expected to respect.
    pub max_in_flight: usize,
}

/// Source of broker messages.
///
/// `subscribe` establishes the subscription and returns once deliveries have
/// started; a returned error means the pipeline must not run. Deliveries go
/// into `output` (blocking while it is full) and continue on the returned
/// task until `token` is cancelled.
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &str;

    fn subscribe<'a>(
        &'a self,
        subscription: &'a Subscription,
        output: BufferSender,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, IngestError>> + Send + 'a>>;
}
