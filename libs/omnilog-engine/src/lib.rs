pub mod broker;
pub mod buffer;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod policy;
pub mod routing;
pub mod workers;

pub use broker::{BrokerClient, MemoryBroker, Subscription, TcpLineBroker};
pub use buffer::{
    BufferClosed, BufferSender, LaneReceiver, PartitionKey, Slot, TrySendError, bounded,
};
pub use config::{AppConfig, ConsumerConfig, FailurePolicyKind};
pub use consumer::{Consumer, ConsumerOptions};
pub use dispatcher::{DispatchOutcome, DispatchStats, Dispatcher, StatsSnapshot};
pub use error::EngineError;
pub use policy::{
    DeadLetter, DeadLetterSink, FailurePolicy, FileDeadLetterSink, MemoryDeadLetterSink,
};
pub use routing::{RoutingTable, RoutingTableBuilder};
pub use workers::{DefaultWorker, LogCreatedWorker};
