//! In-memory log client driven by a fixed script, for engine and lifecycle tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::client::{LogClient, MessageCallback};
use crate::error::ClientError;
use crate::message::Message;

/// One scripted fetch outcome
#[derive(Debug, Clone)]
pub enum Step {
    Deliver(Message),
    /// Make the current `consume` call fail with a non-cancellation error
    FetchError(String),
    /// Make the current `consume` call report a rejected client configuration
    Misconfigured(String),
}

/// Plays back [`Step`]s across every `consume` call, then parks until cancelled.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    topic: String,
    script: Mutex<VecDeque<Step>>,
    commits: Mutex<Vec<(String, i64)>>,
    published: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    consume_calls: Mutex<Vec<Instant>>,
}

impl ScriptedClient {
    pub fn new(topic: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            topic: topic.to_string(),
            script: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Committed (topic, offset) pairs in commit order
    pub fn commits(&self) -> Vec<(String, i64)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn committed_offsets(&self) -> Vec<i64> {
        self.commits().into_iter().map(|(_, offset)| offset).collect()
    }

    pub fn published(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn consume_calls(&self) -> Vec<Instant> {
        self.consume_calls.lock().unwrap().clone()
    }

    /// Time between consecutive `consume` calls
    pub fn consume_gaps(&self) -> Vec<Duration> {
        self.consume_calls()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    pub fn remaining_steps(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    fn next_step(&self) -> Option<Step> {
        self.script.lock().unwrap().pop_front()
    }
}

#[async_trait::async_trait]
impl LogClient for ScriptedClient {
    async fn publish(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), ClientError> {
        self.published.lock().unwrap().push((key, value));
        Ok(())
    }

    async fn consume(&self, cancel: CancellationToken, callback: MessageCallback) -> Result<(), ClientError> {
        self.consume_calls.lock().unwrap().push(Instant::now());

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            match self.next_step() {
                Some(Step::Deliver(message)) => {
                    let (topic, offset) = (message.topic.clone(), message.offset);
                    if callback(message).await.is_ok() {
                        self.commits.lock().unwrap().push((topic, offset));
                    }
                }
                Some(Step::FetchError(reason)) => return Err(ClientError::Fetch(reason)),
                Some(Step::Misconfigured(reason)) => return Err(ClientError::Configuration(reason)),
                None => {
                    cancel.cancelled().await;
                    return Err(ClientError::Cancelled);
                }
            }
        }
    }

    fn topic(&self) -> String {
        self.topic.clone()
    }
}

/// Poll `condition` until it holds, failing the test after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < limit, "condition not met within {:?}", limit);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Messages of WARN events seen on this thread while the guard is alive
pub fn capture_warnings() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(WarningCapture(warnings.clone()));
    (warnings, tracing::subscriber::set_default(subscriber))
}

struct WarningCapture(Arc<Mutex<Vec<String>>>);

impl<S: Subscriber> Layer<S> for WarningCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            let mut message = MessageField::default();
            event.record(&mut message);
            self.0.lock().unwrap().push(message.0);
        }
    }
}

#[derive(Default)]
struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}
