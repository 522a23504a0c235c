use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backoff::Backoff;
use crate::client::{LogClient, MessageCallback};
use crate::config::{Config, RetryConfig};
use crate::error::{ClientError, WorkerError};
use crate::handler::{HandlerContext, HandlerFuture, HandlerRegistry};
use crate::message::Message;

/// Lifecycle state of a [`WorkerEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Engine knobs derived from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// False when messaging or the worker pool is switched off
    pub enabled: bool,
    /// Number of independent consume loops, at least 1
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.is_messaging_enabled() && config.is_worker_pool_enabled(),
            concurrency: config.concurrency(),
            retry: config.retry.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counters shared by every worker loop of one engine
#[derive(Debug, Default)]
pub struct EngineStats {
    delivered: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    unrouted: AtomicU64,
    consume_errors: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Messages handed to the dispatch closure
    pub delivered: u64,
    /// Handler returned `Ok`
    pub handled: u64,
    /// Handler returned an error; offset left uncommitted
    pub failed: u64,
    /// No handler registered for the topic; committed anyway
    pub unrouted: u64,
    /// Non-cancellation errors returned by `consume`
    pub consume_errors: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            consume_errors: self.consume_errors.load(Ordering::Relaxed),
        }
    }
}

/// Resources that exist only between `start` and `stop`
struct RunState {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

/// Runs `concurrency` consume loops against one [`LogClient`] and routes each
/// message to the handler registered for its topic.
///
/// Offsets are committed by the client only after the dispatch closure
/// returns `Ok`. Messages for unregistered topics count as handled.
pub struct WorkerEngine {
    client: Arc<dyn LogClient>,
    registry: Arc<HandlerRegistry>,
    settings: EngineSettings,
    stats: Arc<EngineStats>,
    status: Mutex<EngineStatus>,
    run: Mutex<Option<RunState>>,
}

impl WorkerEngine {
    /// Create a new engine in the `Idle` state
    pub fn new(client: Arc<dyn LogClient>, registry: HandlerRegistry, settings: EngineSettings) -> Self {
        info!(
            "🏊 Creating worker engine for topic '{}' ({} handlers, concurrency {})",
            client.topic(),
            registry.len(),
            settings.concurrency
        );

        Self {
            client,
            registry: Arc::new(registry),
            settings,
            stats: Arc::new(EngineStats::default()),
            status: Mutex::new(EngineStatus::Idle),
            run: Mutex::new(None),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        *self.status.lock().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of worker loops spawned by the current run
    pub async fn worker_count(&self) -> usize {
        self.run
            .lock()
            .await
            .as_ref()
            .map(|run| run.tasks.len())
            .unwrap_or(0)
    }

    /// Spawn the worker loops.
    ///
    /// Starting with messaging disabled or no registered handlers is not an
    /// error: the engine moves straight to `Stopped` without spawning anything.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut status = self.status.lock().await;
        if matches!(*status, EngineStatus::Running | EngineStatus::Draining) {
            return Err(WorkerError::AlreadyRunning);
        }

        if !self.settings.enabled {
            info!("⏸️ Messaging or worker pool disabled, worker engine not started");
            *status = EngineStatus::Stopped;
            return Ok(());
        }

        if self.registry.is_empty() {
            info!("⏸️ No topic handlers registered, worker engine not started");
            *status = EngineStatus::Stopped;
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let concurrency = self.settings.concurrency.max(1);

        for index in 0..concurrency {
            let worker = WorkerLoop {
                id: format!("worker-{}", index),
                client: self.client.clone(),
                registry: self.registry.clone(),
                stats: self.stats.clone(),
                retry: self.settings.retry.clone(),
                cancel: cancel.clone(),
            };
            tasks.spawn(worker.run().in_current_span());
        }

        *self.run.lock().await = Some(RunState { cancel, tasks });
        *status = EngineStatus::Running;

        info!(
            "🚀 Worker engine started with {} loops on topic '{}' (handlers: {:?})",
            concurrency,
            self.client.topic(),
            self.registry.topics()
        );
        Ok(())
    }

    /// Cancel every loop and wait up to `deadline` for them to return.
    ///
    /// Loops still running at the deadline are aborted and
    /// [`WorkerError::StopTimeout`] is returned. Messages they were handling
    /// stay uncommitted and will be redelivered.
    pub async fn stop(&self, deadline: Duration) -> Result<(), WorkerError> {
        let run = self.run.lock().await.take();

        let Some(RunState { cancel, mut tasks }) = run else {
            let mut status = self.status.lock().await;
            if *status != EngineStatus::Draining {
                *status = EngineStatus::Stopped;
            }
            debug!("Worker engine not running, nothing to stop");
            return Ok(());
        };

        *self.status.lock().await = EngineStatus::Draining;
        info!("🛑 Draining {} worker loops (deadline {:?})", tasks.len(), deadline);
        cancel.cancel();

        let result = match tokio::time::timeout(deadline, drain(&mut tasks)).await {
            Ok(()) => {
                info!("✅ All worker loops stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    "⏰ {} worker loops still busy after {:?}, aborting",
                    tasks.len(),
                    deadline
                );
                tasks.shutdown().await;
                Err(WorkerError::StopTimeout(deadline))
            }
        };

        *self.status.lock().await = EngineStatus::Stopped;
        result
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!("❌ Worker loop panicked: {}", e);
            }
        }
    }
}

/// One fetch-dispatch-commit loop
struct WorkerLoop {
    id: String,
    client: Arc<dyn LogClient>,
    registry: Arc<HandlerRegistry>,
    stats: Arc<EngineStats>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl WorkerLoop {
    async fn run(self) {
        debug!("🔄 Worker '{}' starting", self.id);

        let mut backoff = Backoff::new(self.retry.clone());
        let progressed = Arc::new(AtomicBool::new(false));

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let result = self
                .client
                .consume(self.cancel.clone(), self.dispatcher(progressed.clone()))
                .await;

            if self.cancel.is_cancelled() {
                break;
            }
            match &result {
                Err(e) if e.is_cancellation() => break,
                Err(ClientError::Configuration(reason)) => {
                    // Retrying cannot fix a rejected client configuration
                    error!("❌ Worker '{}' cannot consume, stopping loop: {}", self.id, reason);
                    break;
                }
                _ => {}
            }

            // A delivered message since the last failure means the fetch path recovered
            if progressed.swap(false, Ordering::SeqCst) {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            self.stats.consume_errors.fetch_add(1, Ordering::Relaxed);

            match result {
                Err(e) => error!(
                    "❌ Worker '{}' consume failed (attempt {}), retrying in {:?}: {}",
                    self.id,
                    backoff.failures(),
                    delay,
                    e
                ),
                Ok(()) => warn!(
                    "⚠️ Worker '{}' consume returned without cancellation, restarting in {:?}",
                    self.id, delay
                ),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        debug!("✅ Worker '{}' stopped", self.id);
    }

    /// Per-message closure handed to `consume`
    fn dispatcher(&self, progressed: Arc<AtomicBool>) -> MessageCallback {
        let worker_id = self.id.clone();
        let registry = self.registry.clone();
        let stats = self.stats.clone();
        let cancel = self.cancel.clone();

        Arc::new(move |message: Message| -> HandlerFuture {
            progressed.store(true, Ordering::SeqCst);
            stats.delivered.fetch_add(1, Ordering::Relaxed);

            let handler = registry.get(&message.topic).cloned();
            let ctx = HandlerContext::new(worker_id.clone(), cancel.child_token());
            let stats = stats.clone();

            Box::pin(async move {
                let Some(handler) = handler else {
                    warn!(
                        "⚠️ No handler registered for topic '{}', committing offset {} unprocessed",
                        message.topic, message.offset
                    );
                    stats.unrouted.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                };

                let span = info_span!(
                    "worker.message",
                    worker = %ctx.worker_id(),
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key_str()
                );

                let result = async move {
                    let offset = message.offset;
                    let result = handler(ctx, message).await;
                    match &result {
                        Ok(()) => debug!("Message {} processed successfully", offset),
                        Err(e) => error!("❌ Message {} processing failed: {:#}", offset, e),
                    }
                    result
                }
                .instrument(span)
                .await;

                if result.is_ok() {
                    stats.handled.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
        })
    }
}

#[cfg(test)]
mod tests {
    //! Worker engine tests against the scripted in-memory client.
    //!
    //! ### Delivery semantics
    //! - FIFO handling and one commit per handled message
    //! - Failed delivery is not committed, redelivery commits once
    //! - Unregistered topics are committed without a handler call
    //!
    //! ### Lifecycle
    //! - Degenerate starts (disabled, no handlers) spawn nothing
    //! - Double start is rejected, restart after stop is allowed
    //! - Stop deadline aborts stuck loops
    //!
    //! ### Backoff
    //! - 1s, 2s, 4s between consecutive consume failures
    //! - Reset to the floor after a delivered message

    use super::*;
    use crate::handler::HandlerRegistration;
    use crate::noop_client::NoopClient;
    use crate::testing::{capture_warnings, wait_until, ScriptedClient, Step};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    const TOPIC: &str = "orders.events";

    // ========================================================================
    // TEST HELPERS
    // ========================================================================

    fn settings(concurrency: usize) -> EngineSettings {
        EngineSettings {
            enabled: true,
            concurrency,
            retry: RetryConfig::default(),
        }
    }

    fn deliver(topic: &str, offset: i64) -> Step {
        Step::Deliver(Message::new(topic, format!("order-{}", offset), format!("{{\"id\":{}}}", offset), offset))
    }

    /// Handler that records every offset it sees
    fn recording_registry(seen: Arc<StdMutex<Vec<i64>>>) -> HandlerRegistry {
        HandlerRegistry::from_registrations(vec![HandlerRegistration::new(TOPIC, move |_ctx, msg| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(msg.offset);
                Ok(())
            }
        })])
        .unwrap()
    }

    fn engine(client: Arc<ScriptedClient>, registry: HandlerRegistry, settings: EngineSettings) -> WorkerEngine {
        WorkerEngine::new(client, registry, settings)
    }

    // ========================================================================
    // DELIVERY SEMANTICS
    // ========================================================================

    #[tokio::test]
    async fn test_three_messages_handled_in_order_and_committed() {
        let client = Arc::new(ScriptedClient::new(
            TOPIC,
            vec![deliver(TOPIC, 0), deliver(TOPIC, 1), deliver(TOPIC, 2)],
        ));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(client.clone(), recording_registry(seen.clone()), settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(2), || client.commits().len() == 3).await;
        engine.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(client.committed_offsets(), vec![0, 1, 2]);
        assert_eq!(
            engine.stats(),
            StatsSnapshot {
                delivered: 3,
                handled: 3,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_commits_only_on_redelivery() {
        let client = Arc::new(ScriptedClient::new(TOPIC, vec![deliver(TOPIC, 5), deliver(TOPIC, 5)]));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let registry = HandlerRegistry::from_registrations(vec![HandlerRegistration::new(TOPIC, move |_ctx, _msg| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("transient downstream failure");
                }
                Ok(())
            }
        })])
        .unwrap();
        let engine = engine(client.clone(), registry, settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(2), || attempts.load(Ordering::SeqCst) == 2).await;
        wait_until(Duration::from_secs(2), || client.remaining_steps() == 0).await;
        engine.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(client.committed_offsets(), vec![5]);
        let stats = engine.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.handled, 1);
        // Handler failures never count as consume errors
        assert_eq!(stats.consume_errors, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unknown_topic_committed_without_handler() {
        // Worker tasks are polled on this thread, so the capture sees their events
        let (warnings, _guard) = capture_warnings();
        let client = Arc::new(ScriptedClient::new(TOPIC, vec![deliver("unknown.topic", 9)]));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(client.clone(), recording_registry(seen.clone()), settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(2), || client.commits().len() == 1).await;
        engine.stop(Duration::from_secs(1)).await.unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(client.commits(), vec![("unknown.topic".to_string(), 9)]);
        assert_eq!(engine.stats().unrouted, 1);

        let warnings = warnings.lock().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.contains("No handler registered for topic 'unknown.topic'")),
            "missing unrouted warning in {:?}",
            *warnings
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_client_configuration_stops_loop() {
        let client = Arc::new(ScriptedClient::new(
            TOPIC,
            vec![Step::Misconfigured("fetch.max.bytes must be >= message.max.bytes".into())],
        ));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings(1));

        engine.start().await.unwrap();
        sleep(Duration::from_secs(120)).await;

        // No backoff retries against a configuration the client rejected
        assert_eq!(client.consume_calls().len(), 1);
        assert_eq!(engine.stats().consume_errors, 0);
        engine.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_context_carries_worker_id_and_cancellation() {
        let client = Arc::new(ScriptedClient::new(TOPIC, vec![deliver(TOPIC, 0)]));
        let observed = Arc::new(StdMutex::new(None));
        let slot = observed.clone();
        let registry = HandlerRegistry::from_registrations(vec![HandlerRegistration::new(TOPIC, move |ctx, _msg| {
            let slot = slot.clone();
            async move {
                *slot.lock().unwrap() = Some((ctx.worker_id().to_string(), ctx.cancellation().clone()));
                Ok(())
            }
        })])
        .unwrap();
        let engine = engine(client.clone(), registry, settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(2), || client.commits().len() == 1).await;

        let (worker_id, token) = observed.lock().unwrap().clone().unwrap();
        assert_eq!(worker_id, "worker-0");
        assert!(!token.is_cancelled());

        engine.stop(Duration::from_secs(1)).await.unwrap();
        assert!(token.is_cancelled());
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    #[tokio::test]
    async fn test_disabled_messaging_spawns_nothing() {
        let mut config = Config::default();
        config.messaging.enabled = false;
        config.validate().unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let engine = WorkerEngine::new(
            Arc::new(NoopClient::new(TOPIC)),
            recording_registry(seen),
            EngineSettings::from_config(&config),
        );

        engine.start().await.unwrap();
        assert_eq!(engine.worker_count().await, 0);
        assert_eq!(engine.status().await, EngineStatus::Stopped);

        let stopped = tokio::time::timeout(Duration::from_millis(50), engine.stop(Duration::from_secs(10))).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_disabled_worker_pool_spawns_nothing() {
        let mut config = Config::default();
        config.workers.enabled = false;

        let settings = EngineSettings::from_config(&config);
        assert!(!settings.enabled);

        let client = Arc::new(ScriptedClient::new(TOPIC, vec![deliver(TOPIC, 0)]));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings);
        engine.start().await.unwrap();
        assert_eq!(engine.worker_count().await, 0);
        assert!(client.consume_calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_registry_spawns_nothing() {
        let client = Arc::new(ScriptedClient::new(TOPIC, vec![deliver(TOPIC, 0)]));
        let engine = engine(client.clone(), HandlerRegistry::default(), settings(4));

        engine.start().await.unwrap();
        assert_eq!(engine.worker_count().await, 0);
        assert_eq!(engine.status().await, EngineStatus::Stopped);
        engine.stop(Duration::from_secs(1)).await.unwrap();
        assert!(client.consume_calls().is_empty());
    }

    #[tokio::test]
    async fn test_spawns_one_loop_per_concurrency_slot() {
        let client = Arc::new(ScriptedClient::new(TOPIC, Vec::new()));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings(3));

        engine.start().await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Running);
        assert_eq!(engine.worker_count().await, 3);
        wait_until(Duration::from_secs(2), || client.consume_calls().len() == 3).await;

        engine.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Stopped);
        assert_eq!(engine.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_one_loop() {
        let client = Arc::new(ScriptedClient::new(TOPIC, Vec::new()));
        let engine = engine(client, recording_registry(Arc::default()), settings(0));
        engine.start().await.unwrap();
        assert_eq!(engine.worker_count().await, 1);
        engine.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected_and_restart_allowed() {
        let client = Arc::new(ScriptedClient::new(TOPIC, Vec::new()));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings(1));

        assert_eq!(engine.status().await, EngineStatus::Idle);
        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(WorkerError::AlreadyRunning)));

        engine.stop(Duration::from_secs(1)).await.unwrap();
        engine.start().await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Running);
        engine.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_immediate() {
        let client = Arc::new(ScriptedClient::new(TOPIC, Vec::new()));
        let engine = engine(client, recording_registry(Arc::default()), settings(1));
        engine.stop(Duration::from_millis(1)).await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_deadline_aborts_slow_handler() {
        let client = Arc::new(ScriptedClient::new(TOPIC, vec![deliver(TOPIC, 0), deliver(TOPIC, 1)]));
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (started.clone(), finished.clone());
        let registry = HandlerRegistry::from_registrations(vec![HandlerRegistration::new(TOPIC, move |_ctx, _msg| {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                // Ignores cancellation on purpose
                sleep(Duration::from_secs(3600)).await;
                f.store(true, Ordering::SeqCst);
                Ok(())
            }
        })])
        .unwrap();
        let engine = engine(client.clone(), registry, settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst) == 1).await;

        let result = engine.stop(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(WorkerError::StopTimeout(d)) if d == Duration::from_millis(100)));
        assert_eq!(engine.status().await, EngineStatus::Stopped);
        assert_eq!(engine.worker_count().await, 0);

        sleep(Duration::from_secs(7200)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert!(client.commits().is_empty());
        // Nothing fetched after the stop
        assert_eq!(client.remaining_steps(), 1);
    }

    // ========================================================================
    // BACKOFF
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_consume_failures_back_off_exponentially() {
        let client = Arc::new(ScriptedClient::new(
            TOPIC,
            vec![
                Step::FetchError("broker unavailable".into()),
                Step::FetchError("broker unavailable".into()),
                Step::FetchError("broker unavailable".into()),
            ],
        ));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(60), || client.consume_calls().len() == 4).await;
        engine.stop(Duration::from_secs(1)).await.unwrap();

        let gaps: Vec<u64> = client.consume_gaps().iter().map(Duration::as_secs).collect();
        assert_eq!(gaps, vec![1, 2, 4]);
        assert_eq!(engine.stats().consume_errors, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_delivered_message() {
        let client = Arc::new(ScriptedClient::new(
            TOPIC,
            vec![
                Step::FetchError("broker unavailable".into()),
                Step::FetchError("broker unavailable".into()),
                deliver(TOPIC, 0),
                Step::FetchError("broker unavailable".into()),
            ],
        ));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_secs(60), || client.consume_calls().len() == 4).await;
        engine.stop(Duration::from_secs(1)).await.unwrap();

        let gaps: Vec<u64> = client.consume_gaps().iter().map(Duration::as_secs).collect();
        assert_eq!(gaps, vec![1, 2, 1]);
        assert_eq!(client.committed_offsets(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff_sleep() {
        let client = Arc::new(ScriptedClient::new(TOPIC, vec![Step::FetchError("down".into())]));
        let engine = engine(client.clone(), recording_registry(Arc::default()), settings(1));

        engine.start().await.unwrap();
        wait_until(Duration::from_millis(500), || client.consume_calls().len() == 1).await;

        engine.stop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(client.consume_calls().len(), 1);
    }
}
