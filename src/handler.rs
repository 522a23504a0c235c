use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::message::Message;

/// Future returned by a message handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Type alias for topic handler functions.
///
/// Handlers may run concurrently on several worker loops and may see the same
/// message more than once, so they must be idempotent.
pub type Handler = Arc<dyn Fn(HandlerContext, Message) -> HandlerFuture + Send + Sync + 'static>;

/// Per-invocation context handed to a handler alongside the message.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    worker_id: String,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(worker_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            worker_id: worker_id.into(),
            cancel,
        }
    }

    /// ID of the worker loop running this invocation
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Token derived from the engine's run context; fires when the engine drains.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A (topic, handler) pair contributed by a domain module at startup
#[derive(Clone)]
pub struct HandlerRegistration {
    pub topic: String,
    pub handler: Handler,
}

impl HandlerRegistration {
    /// Bind an async function to a topic
    pub fn new<F, Fut>(topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(HandlerContext, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx: HandlerContext, msg: Message| -> HandlerFuture {
            Box::pin(handler(ctx, msg))
        });
        Self {
            topic: topic.into(),
            handler,
        }
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// What to do when two registrations claim the same topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail the build with [`WorkerError::DuplicateTopic`]
    #[default]
    Reject,
    /// The later registration silently replaces the earlier one
    LastWins,
}

/// Immutable topic -> handler mapping, safe to share across worker loops.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Build a registry rejecting duplicate topics
    pub fn from_registrations(
        registrations: impl IntoIterator<Item = HandlerRegistration>,
    ) -> Result<Self, WorkerError> {
        Self::builder().extend(registrations).build()
    }

    /// Look up the handler for a topic
    pub fn get(&self, topic: &str) -> Option<&Handler> {
        self.handlers.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered topics in sorted order
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

/// Collects registrations from independent modules before the engine starts
#[derive(Debug, Default)]
pub struct HandlerRegistryBuilder {
    registrations: Vec<HandlerRegistration>,
    policy: DuplicatePolicy,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, registration: HandlerRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    pub fn extend(mut self, registrations: impl IntoIterator<Item = HandlerRegistration>) -> Self {
        self.registrations.extend(registrations);
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Freeze the collected registrations, in registration order
    pub fn build(self) -> Result<HandlerRegistry, WorkerError> {
        let mut handlers: HashMap<String, Handler> = HashMap::with_capacity(self.registrations.len());

        for registration in self.registrations {
            if registration.topic.trim().is_empty() {
                warn!("Skipping handler registration with empty topic");
                continue;
            }

            if handlers.contains_key(&registration.topic) {
                match self.policy {
                    DuplicatePolicy::Reject => {
                        return Err(WorkerError::DuplicateTopic(registration.topic));
                    }
                    DuplicatePolicy::LastWins => {
                        warn!(topic = %registration.topic, "Duplicate handler registration overrides earlier one");
                    }
                }
            }

            debug!(topic = %registration.topic, "Registered topic handler");
            handlers.insert(registration.topic, registration.handler);
        }

        Ok(HandlerRegistry { handlers })
    }
}
