use std::collections::HashMap;

/// A record delivered from the log.
///
/// Built by a [`LogClient`](crate::client::LogClient) on fetch and handed by
/// value to exactly one worker loop; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    /// Partition-affinity key, opaque to the engine.
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// `None` when the broker delivered no headers.
    pub headers: Option<HashMap<String, String>>,
    pub partition: i32,
    pub offset: i64,
    /// Broker-assigned timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

impl Message {
    /// Create a message with no headers, partition 0 and no timestamp.
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value: value.into(),
            headers: None,
            partition: 0,
            offset,
            timestamp_ms: None,
        }
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.as_ref()?.get(key).map(String::as_str)
    }

    /// Lossy UTF-8 view of the key, for logging.
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }
}
