use omnilog_api::IngestError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("subscription to {topics:?} failed: {source}")]
    Subscription { topics: Vec<String>, source: IngestError },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Ingest` and `Subscription`, context is added to the inner `IngestError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Ingest(e) => EngineError::Ingest(e.with_context(ctx)),
            EngineError::Subscription { topics, source } => EngineError::Subscription {
                topics,
                source: source.with_context(ctx),
            },
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
