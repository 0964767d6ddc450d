//! Consumer / dispatcher (C6).
//!
//! The main processing loop: pull a record from the log, decode it,
//! dispatch it to every registered handler, commit the offset. Built on
//! `rdkafka`'s `StreamConsumer`, modeled on the same recv/process/commit
//! shape as other CDC consumers in this codebase's lineage, adapted to
//! commit only after every handler for a record has been attempted
//! (spec.md §5's ordering guarantee) rather than after a single insert.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::Message;

use crate::config::Config;
use crate::error::ConsumerError;
use crate::metrics::Metrics;
use crate::model::Envelope;
use crate::registry::HandlerRegistry;

/// Consumer state machine (spec.md §4.6). Transitions are one-directional;
/// `state()` is read by the health monitor for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    New,
    Ready,
    Running,
    Draining,
    Failed,
    Stopped,
}

/// In-memory counters the core loop maintains (spec.md §4.6), mirrored
/// into the process's [`Metrics`] registry for `/metrics` scraping.
#[derive(Default)]
struct ConsumerCounters {
    processed: AtomicU64,
    errors: AtomicU64,
}

pub struct Consumer {
    kafka: StreamConsumer,
    topic: String,
    max_poll_records_hint: u32,
    registry: HandlerRegistry,
    metrics: Arc<Metrics>,
    counters: ConsumerCounters,
    running: AtomicBool,
    state: std::sync::Mutex<ConsumerState>,
    started_at: std::sync::Mutex<Option<Instant>>,
}

impl Consumer {
    /// Construct the underlying Kafka client and subscribe, without yet
    /// starting consumption. Corresponds to state `New`.
    pub fn new(config: &Config, registry: HandlerRegistry, metrics: Arc<Metrics>) -> Result<Self, ConsumerError> {
        let kafka: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("group.id", &config.kafka_group_id)
            .set("enable.auto.commit", config.kafka_enable_auto_commit.to_string())
            .set("auto.offset.reset", &config.kafka_auto_offset_reset)
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .create()?;

        Ok(Self {
            kafka,
            topic: config.kafka_topic.clone(),
            max_poll_records_hint: config.kafka_max_poll_records,
            registry,
            metrics,
            counters: ConsumerCounters::default(),
            running: AtomicBool::new(false),
            state: std::sync::Mutex::new(ConsumerState::New),
            started_at: std::sync::Mutex::new(None),
        })
    }

    /// Subscribe to the configured topic. Transitions `New → Ready`.
    pub fn initialize(&self) -> Result<(), ConsumerError> {
        self.kafka.subscribe(&[self.topic.as_str()])?;
        tracing::info!(
            event = "consumer_initialized",
            topic = %self.topic,
            max_poll_records_hint = self.max_poll_records_hint,
            registered_event_types = ?self.registry.registered_event_types(),
            "consumer subscribed"
        );
        *self.state.lock().unwrap() = ConsumerState::Ready;
        Ok(())
    }

    /// Current state-machine state, read by the health monitor for
    /// reporting (spec.md §4.6's state table).
    pub fn state(&self) -> ConsumerState {
        *self.state.lock().unwrap()
    }

    pub fn processed_count(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Cooperative stop: the loop checks this flag only at the
    /// post-commit boundary, so a record already in flight is always
    /// finished and committed before the loop exits (spec.md §5/§7, P10).
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the dispatch loop until `request_shutdown` is called or a
    /// fatal poll error occurs. Transitions `Ready → Running`, then
    /// `Running → Draining → Stopped` on a clean stop, or `Running →
    /// Failed` on a fatal error.
    pub async fn run(&self) -> Result<(), ConsumerError> {
        self.running.store(true, Ordering::SeqCst);
        *self.started_at.lock().unwrap() = Some(Instant::now());
        *self.state.lock().unwrap() = ConsumerState::Running;
        self.metrics.set_running(true);
        tracing::info!(event = "consumer_running", "consumer loop starting");

        while self.running.load(Ordering::Relaxed) {
            match self.kafka.recv().await {
                Ok(message) => {
                    self.process_record(&message).await;

                    if let Err(e) = self.kafka.commit_message(&message, CommitMode::Sync) {
                        tracing::error!(event = "offset_commit_failed", error = %e, "failed to commit offset");
                    }
                }
                Err(e) => {
                    tracing::error!(event = "consumer_poll_error", error = %e, "fatal poll error");
                    *self.state.lock().unwrap() = ConsumerState::Failed;
                    self.metrics.set_running(false);
                    return Err(ConsumerError::Kafka(e));
                }
            }
        }

        *self.state.lock().unwrap() = ConsumerState::Draining;
        tracing::info!(
            event = "consumer_draining",
            processed = self.processed_count(),
            errors = self.error_count(),
            "consumer loop stopped, draining"
        );
        *self.state.lock().unwrap() = ConsumerState::Stopped;
        self.metrics.set_running(false);
        Ok(())
    }

    /// Emit the shutdown summary line and settle the state machine into its
    /// terminal state (spec.md §4.7 step 3). Reachable from `Draining` (the
    /// clean-stop path already leaves `run()` in `Stopped`, so this is a
    /// no-op there) and from `Failed` (`Failed → Stopped` per spec.md
    /// §4.6's state table, after a fatal poll error).
    pub fn shutdown(&self) {
        tracing::info!(
            event = "consumer_shutdown",
            processed = self.processed_count(),
            errors = self.error_count(),
            uptime_seconds = self.uptime_seconds(),
            state = ?self.state(),
            "consumer shut down"
        );
        *self.state.lock().unwrap() = ConsumerState::Stopped;
    }

    /// Decode, skip-check, look up handlers, dispatch, account. Never
    /// returns an error — every failure mode here is recorded and
    /// swallowed so the caller always commits the offset (spec.md §7:
    /// "fail loudly in logs, softly in throughput").
    async fn process_record(&self, message: &rdkafka::message::BorrowedMessage<'_>) {
        let start = Instant::now();
        let partition = message.partition();
        let offset = message.offset();

        let Some(payload) = message.payload() else {
            tracing::warn!(event = "empty_payload", partition, offset, "record has no payload, skipping");
            return;
        };

        let envelope = match Envelope::decode(payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(event = "decode_error", partition, offset, error = %e, "failed to decode envelope");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_event_failed("unknown", "decode_error");
                return;
            }
        };

        if envelope.should_skip() {
            tracing::debug!(event = "envelope_skipped", partition, offset, op = envelope.op.as_char().to_string(), "skipping delete/snapshot envelope");
            return;
        }

        let event = match envelope.to_event() {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(event = "validation_error", partition, offset, error = %e, "failed to validate envelope");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_event_failed("unknown", "validation_error");
                return;
            }
        };

        let handlers = self.registry.get_handlers(&event.event_type);
        if handlers.is_empty() {
            tracing::warn!(
                event = "no_handlers_found",
                event_type = %event.event_type,
                event_id = %event.event_id,
                "no handlers registered for event type"
            );
            return;
        }

        let mut had_failure = false;
        for handler in handlers {
            if !handler.validate(&event).await {
                tracing::info!(
                    event = "event_validation_failed",
                    handler = handler.handler_name(),
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    "handler declined event"
                );
                continue;
            }

            if let Err(e) = handler.handle(&event).await {
                tracing::error!(
                    event = "handler_failed",
                    handler = handler.handler_name(),
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    error = %e,
                    "handler failed"
                );
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_handler_failure(handler.handler_name(), &event.event_type);
                had_failure = true;
                // Sibling handlers still run (spec.md §4.6 step 4b, P3).
            }
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        let elapsed = start.elapsed();
        self.metrics.record_event_processed(&event.event_type, elapsed.as_secs_f64());
        if had_failure {
            self.metrics.record_event_failed(&event.event_type, "handler_error");
        }

        tracing::info!(
            event = "record_processed",
            event_type = %event.event_type,
            event_id = %event.event_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "record processed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_machine_starts_new() {
        // Exercised indirectly via Consumer::new/initialize in integration
        // contexts; here we only assert the enum's equality semantics
        // used by the health monitor.
        assert_eq!(ConsumerState::New, ConsumerState::New);
        assert_ne!(ConsumerState::New, ConsumerState::Running);
    }

    #[test]
    fn shutdown_settles_failed_into_stopped() {
        let config = crate::config::Config::from_env();
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let consumer = Consumer::new(&config, HandlerRegistry::new(), metrics).unwrap();

        // Simulate the `run()` loop hitting a fatal poll error.
        *consumer.state.lock().unwrap() = ConsumerState::Failed;
        assert_eq!(consumer.state(), ConsumerState::Failed);

        consumer.shutdown();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[test]
    fn shutdown_is_a_no_op_when_already_stopped() {
        let config = crate::config::Config::from_env();
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let consumer = Consumer::new(&config, HandlerRegistry::new(), metrics).unwrap();

        *consumer.state.lock().unwrap() = ConsumerState::Stopped;
        consumer.shutdown();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }
}
