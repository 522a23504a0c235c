use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{LogClient, MessageCallback};
use crate::error::ClientError;

/// Stand-in client used when messaging is disabled.
///
/// Publishing succeeds without side effects and consuming parks until
/// cancellation, so the engine runs the same code path either way.
#[derive(Debug, Clone, Default)]
pub struct NoopClient {
    topic: String,
}

impl NoopClient {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }
}

#[async_trait::async_trait]
impl LogClient for NoopClient {
    async fn publish(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), ClientError> {
        debug!(topic = %self.topic, key_len = key.len(), value_len = value.len(), "Noop publish");
        Ok(())
    }

    async fn consume(&self, cancel: CancellationToken, _callback: MessageCallback) -> Result<(), ClientError> {
        cancel.cancelled().await;
        Err(ClientError::Cancelled)
    }

    fn topic(&self) -> String {
        self.topic.clone()
    }
}
