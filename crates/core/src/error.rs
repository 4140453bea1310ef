//! Bridge error model.

use thiserror::Error;

/// Result type used across the bridge crates.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error raised by the bridge components and the hosts they attach to.
///
/// Errors travel unchanged through hook emissions: a handler returns one, the
/// emitter stops and hands it back to whoever started the emission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A component was constructed with unusable settings (e.g. an empty metadata key).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A stream name failed validation.
    #[error("invalid stream name: {0}")]
    InvalidStreamName(String),

    /// Append targeted a stream that does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Create targeted a stream that already exists.
    #[error("stream already exists: {0}")]
    StreamExistsAlready(String),

    /// Optimistic concurrency failure (stale version or duplicate event id).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("transaction already started")]
    TransactionAlreadyStarted,

    #[error("no transaction started")]
    TransactionNotStarted,

    /// No handler is routed for the dispatched message.
    #[error("no handler routed for message '{0}'")]
    NoHandler(String),

    /// Application handler code failed while handling a message.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Publishing an event to the bus failed.
    #[error("event publication failed: {0}")]
    Publish(String),

    /// A hook emission was malformed (missing or mistyped parameter).
    #[error("hook error: {0}")]
    Hook(String),
}

impl BridgeError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }
}
