//! Consumer-group worker engine for a partitioned log.
//!
//! A [`WorkerEngine`] runs a fixed number of consume loops against a
//! [`LogClient`], routes every message to the handler registered for its
//! topic and commits the offset only after the handler succeeds.

pub mod backoff;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod noop_client;
pub mod orders;
pub mod producer;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{build_client, KafkaClient, LogClient, MessageCallback};
pub use config::Config;
pub use engine::{EngineSettings, EngineStatus, StatsSnapshot, WorkerEngine};
pub use error::{ClientError, WorkerError};
pub use handler::{DuplicatePolicy, HandlerContext, HandlerRegistration, HandlerRegistry};
pub use lifecycle::WorkerLifecycle;
pub use message::Message;
pub use noop_client::NoopClient;
pub use producer::EventPublisher;

#[cfg(test)]
#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
