//! error.rs
//! Error types shared by the services and handlers.

use thiserror::Error;

/// The queue transport itself failed (not the job it carried).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("queue dispatcher is not running")]
    DispatcherClosed,
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Command(e.to_string())
        }
    }
}

/// Outcome of a failed relay submit.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to queue job: {0}")]
    Transport(#[from] QueueError),

    /// Only produced in direct mode, where the handler runs inline.
    #[error("job failed (bypassing queue): {0}")]
    Handler(anyhow::Error),

    #[error("no handler registered for queue '{0}'")]
    NoHandler(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracking store is not configured")]
    StoreUnavailable,

    #[error("invalid tracking id: {0}")]
    InvalidId(String),

    #[error("tracking record not found: {0}")]
    NotFound(String),

    #[error("tracking store error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference store is not configured")]
    StoreUnavailable,

    #[error("preference store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt preference history: {0}")]
    History(#[from] serde_json::Error),
}

/// Malformed caller input. Never retried.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
