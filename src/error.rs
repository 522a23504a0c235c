use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a [`LogClient`](crate::client::LogClient) backend.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The caller's cancellation token fired (shutdown or deadline).
    #[error("consume cancelled")]
    Cancelled,
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("offset commit failed: {0}")]
    Commit(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether this error is the terminal "we were asked to stop" case.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

/// Errors the worker engine and its lifecycle report to the host process.
///
/// Per-message and per-fetch failures never show up here; they are absorbed
/// by the worker loops and only visible through logs and [`EngineStats`](crate::engine::EngineStats).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("duplicate handler registration for topic '{0}'")]
    DuplicateTopic(String),
    #[error("worker engine is already running")]
    AlreadyRunning,
    #[error("worker engine did not drain within {0:?}")]
    StopTimeout(Duration),
    #[error(transparent)]
    Client(#[from] ClientError),
}
