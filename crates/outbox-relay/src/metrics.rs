//! Prometheus metrics. Registration failures are logged, never panics —
//! a relay should run even if a second instance collides on metric names
//! in the default registry.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

pub struct OutboxMetrics {
    pub pending_count: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub published_total: IntCounter,
    pub failed_total: IntCounter,
    pub permanently_failed_total: IntCounter,
}

impl OutboxMetrics {
    /// Registers all gauges/counters against `registry`, const-labeled by
    /// `service_name`. Logs and continues on a registration error instead of
    /// returning one, mirroring how the relay treats metrics as best-effort.
    pub fn new(registry: &Registry, service_name: &str) -> Self {
        let pending_count = IntGauge::with_opts(
            Opts::new("outbox_pending_count", "Number of pending outbox rows")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "outbox_oldest_pending_age_seconds",
                "Age in seconds of the oldest pending outbox row",
            )
            .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let published_total = IntCounter::with_opts(
            Opts::new("outbox_published_total", "Messages successfully published")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let failed_total = IntCounter::with_opts(
            Opts::new("outbox_failed_total", "Messages that failed a publish attempt")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let permanently_failed_total = IntCounter::with_opts(
            Opts::new(
                "outbox_permanently_failed_total",
                "Messages that exhausted retries or failed permanently",
            )
            .const_label("service", service_name),
        )
        .expect("metric options are static and valid");

        for collector in [
            Box::new(pending_count.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(published_total.clone()),
            Box::new(failed_total.clone()),
            Box::new(permanently_failed_total.clone()),
        ] {
            if let Err(err) = registry.register(collector) {
                tracing::warn!(error = %err, "failed to register outbox metric");
            }
        }

        Self {
            pending_count,
            oldest_pending_age_seconds,
            published_total,
            failed_total,
            permanently_failed_total,
        }
    }
}
