// Ambient metrics — per-stage token usage, cycle duration, action and
// delivery counters.
//
// The teacher logs metrics to daily JSONL files (`metrics/logger.rs`); here
// we use `prometheus` (already a teacher dependency) since the coordinator
// is a long-lived daemon process better served by in-memory counters than
// an append-only log. The scrape endpoint itself is out of scope (spec §1
// Non-goals exclude WebSocket/REST monitoring) — `Metrics::registry()` is
// what that external layer would mount.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};
use std::sync::Arc;

pub struct Metrics {
    registry: Registry,
    pub brain_tokens_total: IntCounterVec,
    pub cycle_duration_seconds: HistogramVec,
    pub stage_duration_seconds: HistogramVec,
    pub action_executions_total: IntCounterVec,
    pub action_failures_total: IntCounterVec,
    pub router_delivered_total: IntCounterVec,
    pub router_failed_total: IntCounterVec,
    pub sandbox_spawns_total: IntCounterVec,
    pub sandbox_terminations_total: IntCounterVec,
    pub cybers_running: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let brain_tokens_total = register_int_counter_vec_with_registry!(
            "subspace_brain_tokens_total",
            "Tokens consumed per brain request, labeled by cyber and stage",
            &["cyber", "stage"],
            registry
        )
        .expect("valid metric");

        let cycle_duration_seconds = register_histogram_vec_with_registry!(
            "subspace_cycle_duration_seconds",
            "Wall-clock duration of one full cognitive cycle",
            &["cyber"],
            registry
        )
        .expect("valid metric");

        let stage_duration_seconds = register_histogram_vec_with_registry!(
            "subspace_stage_duration_seconds",
            "Wall-clock duration of one cognitive stage",
            &["cyber", "stage"],
            registry
        )
        .expect("valid metric");

        let action_executions_total = register_int_counter_vec_with_registry!(
            "subspace_action_executions_total",
            "Actions executed, labeled by cyber and action name",
            &["cyber", "action"],
            registry
        )
        .expect("valid metric");

        let action_failures_total = register_int_counter_vec_with_registry!(
            "subspace_action_failures_total",
            "Action failures, labeled by cyber, action name, and failure kind",
            &["cyber", "action", "kind"],
            registry
        )
        .expect("valid metric");

        let router_delivered_total = register_int_counter_vec_with_registry!(
            "subspace_router_delivered_total",
            "Messages successfully delivered by the Message Router",
            &["sender", "recipient"],
            registry
        )
        .expect("valid metric");

        let router_failed_total = register_int_counter_vec_with_registry!(
            "subspace_router_failed_total",
            "Messages that permanently failed delivery",
            &["sender", "recipient"],
            registry
        )
        .expect("valid metric");

        let sandbox_spawns_total = register_int_counter_vec_with_registry!(
            "subspace_sandbox_spawns_total",
            "Cyber processes spawned, labeled by kind",
            &["kind"],
            registry
        )
        .expect("valid metric");

        let sandbox_terminations_total = register_int_counter_vec_with_registry!(
            "subspace_sandbox_terminations_total",
            "Cyber processes terminated, labeled by reason",
            &["reason"],
            registry
        )
        .expect("valid metric");

        let cybers_running = register_int_gauge_vec_with_registry!(
            "subspace_cybers_running",
            "Currently running cybers, labeled by kind",
            &["kind"],
            registry
        )
        .expect("valid metric");

        Arc::new(Self {
            registry,
            brain_tokens_total,
            cycle_duration_seconds,
            stage_duration_seconds,
            action_executions_total,
            action_failures_total,
            router_delivered_total,
            router_failed_total,
            sandbox_spawns_total,
            sandbox_terminations_total,
            cybers_running,
        })
    }

    /// The underlying prometheus registry, for an (out-of-scope) scrape
    /// endpoint to mount.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently_per_label() {
        let metrics = Metrics::new();
        metrics
            .brain_tokens_total
            .with_label_values(&["alice", "decision"])
            .inc_by(42);
        metrics
            .brain_tokens_total
            .with_label_values(&["bob", "decision"])
            .inc_by(7);

        assert_eq!(
            metrics
                .brain_tokens_total
                .with_label_values(&["alice", "decision"])
                .get(),
            42
        );
        assert_eq!(
            metrics
                .brain_tokens_total
                .with_label_values(&["bob", "decision"])
                .get(),
            7
        );
    }
}
