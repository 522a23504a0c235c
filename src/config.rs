use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::WorkerError;

/// librdkafka rejects a `fetch.max.bytes` below its default `message.max.bytes`
pub const MIN_FETCH_MAX_BYTES: u32 = 1_000_000;

/// Main configuration structure that mirrors the config.yaml file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default = "ServiceConfig::default")]
    pub service: ServiceConfig,
    #[serde(default = "MessagingConfig::default")]
    pub messaging: MessagingConfig,
    #[serde(default = "WorkersConfig::default")]
    pub workers: WorkersConfig,
    #[serde(default = "RetryConfig::default")]
    pub retry: RetryConfig,
    #[serde(default = "ShutdownConfig::default")]
    pub shutdown: ShutdownConfig,
    #[serde(default = "LoggingConfig::default")]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Supported messaging backends
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessagingDriver {
    Kafka,
    Noop,
}

impl FromStr for MessagingDriver {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kafka" => Ok(MessagingDriver::Kafka),
            "noop" => Ok(MessagingDriver::Noop),
            other => Err(WorkerError::Configuration(format!(
                "unsupported messaging driver: {}",
                other
            ))),
        }
    }
}

/// Broker connection and subscription settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MessagingConfig {
    pub enabled: bool,
    pub driver: MessagingDriver,
    pub brokers: Vec<String>,
    pub client_id: String,
    pub topic: String,
    pub consumer_group: String,
    /// Lower bound of bytes the broker accumulates before answering a fetch.
    pub min_bytes: u32,
    /// Upper bound of bytes returned by a single fetch.
    pub max_bytes: u32,
    /// Offset flush interval. 0 commits synchronously after every message.
    pub commit_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkersConfig {
    pub enabled: bool,
    /// Number of concurrent worker loops. Values <= 0 are treated as 1.
    pub concurrency: i32,
    /// Pause after a transient fetch failure. Values <= 0 are treated as 1000.
    pub poll_interval_ms: i64,
}

/// Exponential backoff applied by a worker loop after its consume call fails.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Deadline for draining worker loops on stop
    pub timeout_secs: u64,
}

/// Log output encodings
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

impl FromStr for LogFormat {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "console" => Ok(LogFormat::Console),
            other => Err(WorkerError::Configuration(format!(
                "unsupported log encoding: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

fn default_environment() -> String {
    "local".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "atlas".to_string(),
            environment: default_environment(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            driver: MessagingDriver::Kafka,
            brokers: vec!["127.0.0.1:9092".to_string()],
            client_id: "atlas-service".to_string(),
            topic: "orders.events".to_string(),
            consumer_group: "atlas-worker".to_string(),
            min_bytes: 10_000,
            max_bytes: 10_000_000,
            commit_interval_ms: 1000,
            connect_timeout_ms: 5000,
            publish_timeout_ms: 10_000,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 4,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for the given retry attempt using exponential backoff
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay_ms =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_delay_ms = delay_ms.min(self.max_delay_ms as f64) as u64;

        Duration::from_millis(capped_delay_ms)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Build the effective configuration: the YAML file when it exists (built-in
    /// defaults otherwise), then environment overrides, then validation.
    pub fn resolve(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path)?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), WorkerError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by environment variable name.
    ///
    /// Values that fail to parse are ignored and the current value stands. An
    /// unknown driver or log encoding is a configuration error.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_bool(lookup("MESSAGING_ENABLED")) {
            self.messaging.enabled = v;
        }
        if let Some(v) = lookup("MESSAGING_DRIVER") {
            self.messaging.driver = v.parse()?;
        }
        if let Some(v) = lookup("KAFKA_BROKERS") {
            let brokers = split_list(&v);
            if !brokers.is_empty() {
                self.messaging.brokers = brokers;
            }
        }
        if let Some(v) = lookup("KAFKA_CLIENT_ID") {
            self.messaging.client_id = v;
        }
        if let Some(v) = lookup("KAFKA_TOPIC") {
            self.messaging.topic = v;
        }
        if let Some(v) = lookup("KAFKA_CONSUMER_GROUP") {
            self.messaging.consumer_group = v;
        }
        if let Some(v) = parse_value(lookup("KAFKA_MIN_BYTES")) {
            self.messaging.min_bytes = v;
        }
        if let Some(v) = parse_value(lookup("KAFKA_MAX_BYTES")) {
            self.messaging.max_bytes = v;
        }
        if let Some(v) = parse_value(lookup("KAFKA_COMMIT_INTERVAL_MS")) {
            self.messaging.commit_interval_ms = v;
        }
        if let Some(v) = parse_value(lookup("KAFKA_CONNECT_TIMEOUT_MS")) {
            self.messaging.connect_timeout_ms = v;
        }
        if let Some(v) = parse_bool(lookup("WORKER_ENABLED")) {
            self.workers.enabled = v;
        }
        if let Some(v) = parse_value(lookup("WORKER_CONCURRENCY")) {
            self.workers.concurrency = v;
        }
        if let Some(v) = parse_value(lookup("WORKER_POLL_INTERVAL_MS")) {
            self.workers.poll_interval_ms = v;
        }
        if let Some(v) = lookup("OBS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("OBS_LOG_ENCODING") {
            self.logging.format = v.parse()?;
        }
        if let Some(v) = lookup("OBS_SERVICE_NAME") {
            self.service.name = v;
        }
        if let Some(v) = lookup("OBS_ENVIRONMENT") {
            self.service.environment = v;
        }

        Ok(())
    }

    /// Normalise defaults and reject settings the worker cannot start with
    pub fn validate(&mut self) -> Result<(), WorkerError> {
        if !self.messaging.enabled {
            self.messaging.driver = MessagingDriver::Noop;
        }

        if self.messaging.driver == MessagingDriver::Kafka {
            self.messaging.brokers = self
                .messaging
                .brokers
                .iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();

            if self.messaging.brokers.is_empty() {
                return Err(WorkerError::Configuration(
                    "KAFKA_BROKERS must be provided".to_string(),
                ));
            }
            if self.messaging.topic.trim().is_empty() {
                return Err(WorkerError::Configuration(
                    "KAFKA_TOPIC must be provided".to_string(),
                ));
            }
            if self.messaging.consumer_group.trim().is_empty() {
                return Err(WorkerError::Configuration(
                    "KAFKA_CONSUMER_GROUP must be provided".to_string(),
                ));
            }
            if self.messaging.min_bytes > self.messaging.max_bytes {
                return Err(WorkerError::Configuration(format!(
                    "min_bytes ({}) cannot be greater than max_bytes ({})",
                    self.messaging.min_bytes, self.messaging.max_bytes
                )));
            }
            if self.messaging.max_bytes < MIN_FETCH_MAX_BYTES {
                return Err(WorkerError::Configuration(format!(
                    "max_bytes ({}) must be at least {} (the broker client's message.max.bytes)",
                    self.messaging.max_bytes, MIN_FETCH_MAX_BYTES
                )));
            }
        }

        if self.workers.concurrency <= 0 {
            self.workers.concurrency = 1;
        }
        if self.workers.poll_interval_ms <= 0 {
            self.workers.poll_interval_ms = 1000;
        }

        self.logging.level = self.logging.level.trim().to_lowercase();
        if self.logging.level.is_empty() {
            self.logging.level = "info".to_string();
        }

        Ok(())
    }

    /// Whether the log client is live (driver is not noop)
    pub fn is_messaging_enabled(&self) -> bool {
        self.messaging.enabled && self.messaging.driver != MessagingDriver::Noop
    }

    /// Whether the worker pool should run at all
    pub fn is_worker_pool_enabled(&self) -> bool {
        self.is_messaging_enabled() && self.workers.enabled
    }

    /// Effective number of worker loops (never below 1)
    pub fn concurrency(&self) -> usize {
        self.workers.concurrency.max(1) as usize
    }

    pub fn poll_interval(&self) -> Duration {
        if self.workers.poll_interval_ms <= 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_millis(self.workers.poll_interval_ms as u64)
        }
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.messaging.commit_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.messaging.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.messaging.publish_timeout_ms)
    }

    /// Deadline for the lifecycle stop operation
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.timeout_secs)
    }
}

fn parse_value<T: FromStr>(value: Option<String>) -> Option<T> {
    value?.trim().parse().ok()
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    match value?.trim().to_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// Split a comma separated list, dropping blank entries
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
