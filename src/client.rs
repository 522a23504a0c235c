use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Headers, Message as KafkaMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ClientError;
use crate::handler::HandlerFuture;
use crate::message::Message;
use crate::noop_client::NoopClient;

/// Per-message callback supplied to [`LogClient::consume`].
///
/// `Ok` means the message was handled and its offset may be committed.
pub type MessageCallback = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync + 'static>;

/// Publish/consume contract shared by every log backend
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LogClient: Send + Sync {
    /// Append one record to the configured topic.
    async fn publish(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), ClientError>;

    /// Pull messages until `cancel` fires or a non-transient error occurs.
    ///
    /// Each message is passed to `callback` inline, before the next fetch. The
    /// offset is committed only when the callback succeeds. Returns
    /// [`ClientError::Cancelled`] once cancellation is observed.
    async fn consume(&self, cancel: CancellationToken, callback: MessageCallback) -> Result<(), ClientError>;

    /// The configured topic name
    fn topic(&self) -> String;
}

/// Fetch and commit primitives of a single consumer-group member
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next record
    async fn fetch(&self) -> Result<Message, KafkaError>;

    /// Mark `offset` and everything before it on the partition as processed
    fn commit(&self, topic: String, partition: i32, offset: i64) -> Result<(), ClientError>;
}

/// Build the log client selected by configuration
pub fn build_client(config: &Config) -> Result<Arc<dyn LogClient>, ClientError> {
    if !config.is_messaging_enabled() {
        info!("Messaging disabled; using noop client");
        return Ok(Arc::new(NoopClient::new(config.messaging.topic.clone())));
    }

    Ok(Arc::new(KafkaClient::new(config)?))
}

/// Settings shared by producers and consumers
pub fn create_client_config(config: &Config) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.messaging.brokers.join(","))
        .set("client.id", &config.messaging.client_id)
        .set(
            "socket.connection.setup.timeout.ms",
            config.connect_timeout().as_millis().max(1000).to_string(),
        );
    client_config
}

/// Producer settings: every in-sync replica must acknowledge a record
pub fn create_producer_config(config: &Config) -> ClientConfig {
    let mut client_config = create_client_config(config);
    client_config
        .set("acks", "all")
        .set("message.timeout.ms", config.publish_timeout().as_millis().to_string());
    client_config
}

/// Consumer-group member settings with manual offset management
pub fn create_consumer_config(config: &Config) -> ClientConfig {
    let mut client_config = create_client_config(config);
    let messaging = &config.messaging;

    client_config
        .set("group.id", &messaging.consumer_group)
        .set("auto.offset.reset", "earliest")
        .set("fetch.min.bytes", messaging.min_bytes.max(1).to_string())
        .set("fetch.max.bytes", messaging.max_bytes.to_string())
        .set("max.partition.fetch.bytes", messaging.max_bytes.to_string());

    let commit_interval = config.commit_interval();
    if commit_interval.is_zero() {
        // Synchronous commit after every handled message
        client_config.set("enable.auto.commit", "false");
    } else {
        // Offsets are stored after success and flushed on the interval
        client_config
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", commit_interval.as_millis().to_string())
            .set("enable.auto.offset.store", "false");
    }

    client_config
}

/// Kafka-backed log client.
///
/// Publishing goes through one shared producer. Every `consume` call creates
/// its own consumer-group member, so concurrent worker loops never share a
/// consumer and the broker spreads partitions across them.
pub struct KafkaClient {
    config: Config,
    producer: FutureProducer,
    topic: String,
}

impl KafkaClient {
    /// Create a Kafka client.
    ///
    /// The producer starts dialling the bootstrap brokers right away. The
    /// consumer settings are checked by building one throwaway consumer, so a
    /// configuration librdkafka rejects fails here instead of in a worker loop.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        if config.messaging.brokers.is_empty() {
            return Err(ClientError::Configuration(
                "KAFKA_BROKERS must be provided".to_string(),
            ));
        }
        if config.messaging.topic.trim().is_empty() {
            return Err(ClientError::Configuration(
                "KAFKA_TOPIC must be provided".to_string(),
            ));
        }

        let _checked: StreamConsumer = create_consumer_config(config)
            .create()
            .map_err(|e| ClientError::Configuration(format!("Failed to create Kafka consumer: {}", e)))?;

        let producer: FutureProducer = create_producer_config(config)
            .create()
            .map_err(|e| ClientError::Configuration(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            brokers = %config.messaging.brokers.join(","),
            topic = %config.messaging.topic,
            group = %config.messaging.consumer_group,
            "🔌 Kafka client initialized"
        );

        Ok(Self {
            config: config.clone(),
            producer,
            topic: config.messaging.topic.clone(),
        })
    }

    fn create_source(&self) -> Result<KafkaSource, ClientError> {
        let member_id = format!("{}-{}", self.config.messaging.client_id, Uuid::new_v4());
        let consumer: StreamConsumer = create_consumer_config(&self.config)
            .set("client.id", &member_id)
            .create()
            .map_err(|e| ClientError::Configuration(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| ClientError::Fetch(format!("Failed to subscribe to '{}': {}", self.topic, e)))?;

        debug!(member = %member_id, topic = %self.topic, "Kafka consumer subscribed");
        Ok(KafkaSource {
            consumer,
            sync_commit: self.config.commit_interval().is_zero(),
        })
    }
}

/// A subscribed [`StreamConsumer`]
pub struct KafkaSource {
    consumer: StreamConsumer,
    /// Commit synchronously instead of storing for the auto-commit flush
    sync_commit: bool,
}

#[async_trait::async_trait]
impl MessageSource for KafkaSource {
    async fn fetch(&self) -> Result<Message, KafkaError> {
        self.consumer.recv().await.map(|record| to_message(&record))
    }

    fn commit(&self, topic: String, partition: i32, offset: i64) -> Result<(), ClientError> {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| ClientError::Commit(e.to_string()))?;

        let result = if self.sync_commit {
            self.consumer.commit(&positions, CommitMode::Sync)
        } else {
            self.consumer.store_offsets(&positions)
        };
        result.map_err(|e| ClientError::Commit(e.to_string()))
    }
}

/// Run the fetch, handle, commit cycle against `source`.
///
/// Returns [`ClientError::Cancelled`] once `cancel` fires and
/// [`ClientError::Fetch`] on a fatal fetch error. Transient fetch errors are
/// logged and retried after `poll_interval`.
pub async fn consume_from<S>(
    source: &S,
    poll_interval: Duration,
    cancel: &CancellationToken,
    callback: &MessageCallback,
) -> Result<(), ClientError>
where
    S: MessageSource + ?Sized,
{
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            fetched = source.fetch() => fetched,
        };

        let message = match fetched {
            Ok(message) => message,
            Err(e) if is_fatal(&e) => {
                return Err(ClientError::Fetch(e.to_string()));
            }
            Err(e) => {
                error!(error = %e, "Kafka fetch failed");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    _ = sleep(poll_interval) => {}
                }
                continue;
            }
        };

        let (topic, partition, offset) = (message.topic.clone(), message.partition, message.offset);

        if let Err(e) = callback(message).await {
            // No commit: the broker redelivers from the last committed position
            debug!(error = %e, topic = %topic, partition, offset, "Skipping commit after handler failure");
            continue;
        }

        if let Err(e) = source.commit(topic.clone(), partition, offset) {
            warn!(error = %e, topic = %topic, partition, offset, "Offset commit failed");
        }
    }
}

/// Errors after which the consumer instance cannot be used any more
fn is_fatal(error: &KafkaError) -> bool {
    matches!(error, KafkaError::Subscription(_))
        || error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal)
}

/// Copy a fetched Kafka record into an owned [`Message`]
fn to_message<M: KafkaMessage>(record: &M) -> Message {
    let headers = record.headers().and_then(|headers| {
        let map: HashMap<String, String> = headers
            .iter()
            .map(|header| {
                let value = header
                    .value
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .unwrap_or_default();
                (header.key.to_string(), value)
            })
            .collect();
        if map.is_empty() {
            None
        } else {
            Some(map)
        }
    });

    let mut message = Message::new(
        record.topic(),
        record.key().map(<[u8]>::to_vec).unwrap_or_default(),
        record.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        record.offset(),
    )
    .with_partition(record.partition());
    if let Some(timestamp_ms) = record.timestamp().to_millis() {
        message = message.with_timestamp_ms(timestamp_ms);
    }
    message.headers = headers;
    message
}

#[async_trait::async_trait]
impl LogClient for KafkaClient {
    async fn publish(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), ClientError> {
        let record = FutureRecord::to(&self.topic)
            .key(key.as_slice())
            .payload(value.as_slice());

        self.producer
            .send(record, Timeout::After(self.config.publish_timeout()))
            .await
            .map(|_| {
                trace!(topic = %self.topic, "Record acknowledged by all in-sync replicas");
            })
            .map_err(|(e, _)| ClientError::Publish(e.to_string()))
    }

    async fn consume(&self, cancel: CancellationToken, callback: MessageCallback) -> Result<(), ClientError> {
        let source = self.create_source()?;
        consume_from(&source, self.config.poll_interval(), &cancel, &callback).await
    }

    fn topic(&self) -> String {
        self.topic.clone()
    }
}
