//! Prometheus metrics for the inbox side.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

pub struct InboxMetrics {
    pub received_total: IntCounter,
    pub duplicate_total: IntCounter,
    pub processed_total: IntCounter,
    pub failed_total: IntCounter,
    pub permanently_failed_total: IntCounter,
    pub pending_retry_count: IntGauge,
}

impl InboxMetrics {
    pub fn new(registry: &Registry, service_name: &str) -> Self {
        let received_total = IntCounter::with_opts(
            Opts::new("inbox_received_total", "Messages received").const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let duplicate_total = IntCounter::with_opts(
            Opts::new("inbox_duplicate_total", "Duplicate messages rejected")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let processed_total = IntCounter::with_opts(
            Opts::new("inbox_processed_total", "Messages processed successfully")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let failed_total = IntCounter::with_opts(
            Opts::new("inbox_failed_total", "Messages that failed a processing attempt")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let permanently_failed_total = IntCounter::with_opts(
            Opts::new(
                "inbox_permanently_failed_total",
                "Messages that exhausted retries or failed permanently",
            )
            .const_label("service", service_name),
        )
        .expect("metric options are static and valid");
        let pending_retry_count = IntGauge::with_opts(
            Opts::new("inbox_pending_retry_count", "Messages waiting for a retry pass")
                .const_label("service", service_name),
        )
        .expect("metric options are static and valid");

        for collector in [
            Box::new(received_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(duplicate_total.clone()),
            Box::new(processed_total.clone()),
            Box::new(failed_total.clone()),
            Box::new(permanently_failed_total.clone()),
            Box::new(pending_retry_count.clone()),
        ] {
            if let Err(err) = registry.register(collector) {
                tracing::warn!(error = %err, "failed to register inbox metric");
            }
        }

        Self {
            received_total,
            duplicate_total,
            processed_total,
            failed_total,
            permanently_failed_total,
            pending_retry_count,
        }
    }
}
