// metrics.rs — Prometheus counters and latency histogram for the decision engine.
//
// Each engine owns its own `Registry` so several engines (and tests) can run in
// one process without name clashes. Callers export it with any prometheus
// encoder; `snapshot()` is the in-process read-out.

use std::time::Duration;

use prometheus::core::Metric;
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use serde::{Deserialize, Serialize};

/// Decision latency buckets, in seconds. The default deadline is 40 ms.
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
];

pub struct EngineMetrics {
    registry: Registry,
    evaluations: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    denials: IntCounter,
    rule_timeouts: IntCounter,
    evaluator_errors: IntCounter,
    latency: Histogram,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub denials: u64,
    pub rule_timeouts: u64,
    pub evaluator_errors: u64,
    pub mean_latency_micros: u64,
    /// Smallest histogram bucket bound covering every decision so far;
    /// `None` when a decision overran the largest bucket.
    pub latency_upper_bound_micros: Option<u64>,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.evaluations as f64
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace("gov"))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn seconds_to_micros(seconds: f64) -> u64 {
    (seconds * 1_000_000.0).round() as u64
}

impl EngineMetrics {
    /// Create the engine's metrics in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let latency = Histogram::with_opts(
            HistogramOpts::new(
                "decision_latency_seconds",
                "Time from proposal to decision, cache hits included",
            )
            .namespace("gov")
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            evaluations: counter(&registry, "decisions_total", "Proposals evaluated")?,
            cache_hits: counter(&registry, "decision_cache_hits_total", "Decisions from cache")?,
            cache_misses: counter(
                &registry,
                "decision_cache_misses_total",
                "Decisions computed against the rule set",
            )?,
            denials: counter(&registry, "denials_total", "Decisions that denied")?,
            rule_timeouts: counter(
                &registry,
                "rule_timeouts_total",
                "Rules still pending at the decision deadline",
            )?,
            evaluator_errors: counter(
                &registry,
                "evaluator_errors_total",
                "Rules the predicate evaluator failed on",
            )?,
            latency,
            registry,
        })
    }

    /// The registry holding every engine metric, for export.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_decision(&self, cache_hit: bool, denied: bool, latency: Duration) {
        self.evaluations.inc();
        if cache_hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
        if denied {
            self.denials.inc();
        }
        self.latency.observe(latency.as_secs_f64());
    }

    pub fn record_rule_failures(&self, timeouts: u64, errors: u64) {
        self.rule_timeouts.inc_by(timeouts);
        self.evaluator_errors.inc_by(errors);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.latency.get_sample_count();
        let mean_latency_micros = if samples == 0 {
            0
        } else {
            seconds_to_micros(self.latency.get_sample_sum() / samples as f64)
        };

        let proto = self.latency.metric();
        let latency_upper_bound_micros = if samples == 0 {
            Some(0)
        } else {
            proto
                .get_histogram()
                .get_bucket()
                .iter()
                .find(|bucket| bucket.get_cumulative_count() == samples)
                .map(|bucket| seconds_to_micros(bucket.get_upper_bound()))
        };

        MetricsSnapshot {
            evaluations: self.evaluations.get(),
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            denials: self.denials.get(),
            rule_timeouts: self.rule_timeouts.get(),
            evaluator_errors: self.evaluator_errors.get(),
            mean_latency_micros,
            latency_upper_bound_micros,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_hits_misses_and_latency() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_decision(false, true, Duration::from_micros(300));
        metrics.record_decision(true, true, Duration::from_micros(100));
        metrics.record_rule_failures(1, 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.evaluations, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.denials, 2);
        assert_eq!(snap.rule_timeouts, 1);
        assert_eq!(snap.evaluator_errors, 0);
        assert_eq!(snap.mean_latency_micros, 200);
        assert_eq!(snap.latency_upper_bound_micros, Some(500));
        assert!((snap.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn slow_decision_has_no_bucket_bound() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_decision(false, false, Duration::from_secs(1));
        assert_eq!(metrics.snapshot().latency_upper_bound_micros, None);
    }

    #[test]
    fn registry_exports_every_metric() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_decision(false, false, Duration::from_millis(2));

        let families = metrics.registry().gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        for expected in [
            "gov_decisions_total",
            "gov_decision_cache_hits_total",
            "gov_decision_cache_misses_total",
            "gov_denials_total",
            "gov_rule_timeouts_total",
            "gov_evaluator_errors_total",
            "gov_decision_latency_seconds",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }

        let mut text = Vec::new();
        prometheus::Encoder::encode(&prometheus::TextEncoder::new(), &families, &mut text)
            .unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("gov_decision_cache_misses_total 1"));
    }
}
