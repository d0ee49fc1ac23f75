use std::fmt;

/// Error kind for ingestion errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Event payload could not be projected into its typed shape.
    Decode,
    /// The persistence port refused or failed to store a record.
    Storage,
    /// Broker subscription or delivery failure.
    Broker,
    Config,
    Logic,
}

/// Ingestion error returned by handlers and the persistence port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl IngestError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Decode, message: msg.into() }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Storage, message: msg.into() }
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Broker, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for IngestError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → IngestError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        Self::broker(e.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e.to_string())
    }
}
