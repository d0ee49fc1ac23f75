#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Engine(#[from] omnilog_engine::EngineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
