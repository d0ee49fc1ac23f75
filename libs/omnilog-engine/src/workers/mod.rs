mod default;
mod log_created;

pub use default::DefaultWorker;
pub use log_created::LogCreatedWorker;
