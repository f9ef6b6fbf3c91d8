//! Prometheus metrics for reconciliation passes

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Success,
    Requeue,
    Error,
}

impl ReconcileResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Requeue => "requeue",
            Self::Error => "error",
        }
    }
}

/// Prometheus metrics collector for the controller
#[derive(Clone)]
pub struct Metrics {
    /// Reconciliation passes by kind and outcome
    pub reconciliations_total: CounterVec,
    /// Reconciliation pass duration by kind
    pub reconcile_duration_seconds: HistogramVec,
    /// Phase changes written to Wukong status
    pub phase_transitions_total: CounterVec,
    registry: Registry,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a collector with its own registry
    ///
    /// # Errors
    ///
    /// Fails if a metric cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations_total = CounterVec::new(
            Opts::new("wukong_reconciliations_total", "Total reconciliation passes"),
            &["kind", "result"],
        )?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "wukong_reconcile_duration_seconds",
                "Reconciliation pass latency in seconds",
            ),
            &["kind"],
        )?;

        let phase_transitions_total = CounterVec::new(
            Opts::new("wukong_phase_transitions_total", "Wukong phase transitions"),
            &["phase"],
        )?;

        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(phase_transitions_total.clone()))?;

        Ok(Self {
            reconciliations_total,
            reconcile_duration_seconds,
            phase_transitions_total,
            registry,
        })
    }

    /// Records one finished pass.
    pub fn observe_reconcile(&self, kind: &str, result: ReconcileResult, elapsed: Duration) {
        self.reconciliations_total
            .with_label_values(&[kind, result.as_str()])
            .inc();
        self.reconcile_duration_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_phase(&self, phase: &str) {
        self.phase_transitions_total.with_label_values(&[phase]).inc();
    }

    /// Gather all metrics in Prometheus text format
    ///
    /// # Errors
    ///
    /// Fails if a metric family cannot be encoded.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_reconcile("Wukong", ReconcileResult::Requeue, Duration::from_millis(40));
        metrics.observe_phase("Running");

        let text = metrics.gather().unwrap();
        assert!(text.contains("wukong_reconciliations_total{kind=\"Wukong\",result=\"requeue\"} 1"));
        assert!(text.contains("wukong_reconcile_duration_seconds_count{kind=\"Wukong\"} 1"));
        assert!(text.contains("wukong_phase_transitions_total{phase=\"Running\"} 1"));
    }

    #[test]
    fn test_collectors_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.observe_phase("Error");
        assert!(!second.gather().unwrap().contains("phase=\"Error\""));
    }
}
