use crate::error::Result;
use prometheus::{exponential_buckets, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;
use tracing::error;

/// Prometheus metrics for one orchestrator. Each instance owns its registry
/// so several orchestrators can coexist in a process.
#[derive(Clone)]
pub struct CognitiveMetrics {
    registry: Registry,

    pub thoughts_recorded_total: IntCounter,
    pub memories_stored_total: IntCounter,
    pub decisions_analyzed_total: IntCounter,
    pub state_transitions_total: IntCounter,
    pub rejected_transitions_total: IntCounter,
    pub consolidations_total: IntCounter,
    pub biases_detected_total: IntCounter,

    pub working_memory_items: IntGauge,

    pub maintenance_tick_duration_seconds: Histogram,
}

impl std::fmt::Debug for CognitiveMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitiveMetrics")
            .field("thoughts_recorded_total", &self.thoughts_recorded_total.get())
            .field("state_transitions_total", &self.state_transitions_total.get())
            .field("working_memory_items", &self.working_memory_items.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl CognitiveMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let thoughts_recorded_total = counter(
            &registry,
            "thoughts_recorded_total",
            "Total number of thoughts recorded in the journal",
        )?;
        let memories_stored_total = counter(
            &registry,
            "memories_stored_total",
            "Total number of memories stored",
        )?;
        let decisions_analyzed_total = counter(
            &registry,
            "decisions_analyzed_total",
            "Total number of decisions analyzed",
        )?;
        let state_transitions_total = counter(
            &registry,
            "state_transitions_total",
            "Total number of committed state transitions",
        )?;
        let rejected_transitions_total = counter(
            &registry,
            "rejected_transitions_total",
            "Total number of rejected state transitions",
        )?;
        let consolidations_total = counter(
            &registry,
            "consolidations_total",
            "Total number of memory consolidation passes",
        )?;
        let biases_detected_total = counter(
            &registry,
            "biases_detected_total",
            "Total number of systematic biases recorded",
        )?;

        let working_memory_items = IntGauge::with_opts(Opts::new(
            "working_memory_items",
            "Items currently held in working memory",
        ))?;
        registry.register(Box::new(working_memory_items.clone()))?;

        let maintenance_tick_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "maintenance_tick_duration_seconds",
                "Duration of background maintenance ticks in seconds",
            )
            .buckets(exponential_buckets(0.001, 2.0, 15)?),
        )?;
        registry.register(Box::new(maintenance_tick_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            thoughts_recorded_total,
            memories_stored_total,
            decisions_analyzed_total,
            state_transitions_total,
            rejected_transitions_total,
            consolidations_total,
            biases_detected_total,
            working_memory_items,
            maintenance_tick_duration_seconds,
        })
    }

    pub fn record_tick(&self, start: Instant) {
        self.maintenance_tick_duration_seconds
            .observe(start.elapsed().as_secs_f64());
    }

    pub fn record_transition(&self, committed: bool) {
        if committed {
            self.state_transitions_total.inc();
        } else {
            self.rejected_transitions_total.inc();
        }
    }

    pub fn set_working_memory_items(&self, count: usize) {
        self.working_memory_items.set(count as i64);
    }

    /// Text exposition format.
    pub fn export(&self) -> String {
        use prometheus::TextEncoder;
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}
