use prometheus::{histogram_opts, opts, HistogramTimer, HistogramVec, IntCounterVec, Registry};

use crate::Error;

/// Reconcile counters and latencies, labelled by controller.
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "spot_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["controller"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!("spot_reconcile_failures_total", "reconciliation errors"),
            &["controller", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!("spot_reconciliations_total", "reconciliations"),
            &["controller"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, controller: &str, e: &Error) {
        self.failures
            .with_label_values(&[controller, e.metric_label().as_ref()])
            .inc()
    }

    /// Counts a reconcile and times it until the returned guard drops.
    pub fn count_and_measure(&self, controller: &str) -> HistogramTimer {
        self.reconciliations.with_label_values(&[controller]).inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .start_timer()
    }
}
