// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_gauge_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, GaugeVec,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 7.5,
    10., 15., 20., 30., 45., 60., 90., 120.,
];

#[derive(Clone, Debug)]
pub struct SweeperMetrics {
    pub(crate) requests_received: IntCounterVec,
    pub(crate) requests_ok: IntCounterVec,
    pub(crate) err_requests: IntCounterVec,
    pub(crate) requests_inflight: IntGaugeVec,

    pub(crate) cycles_total: IntCounter,
    pub(crate) cycles_failed: IntCounterVec,
    pub(crate) last_checked_block: IntGauge,
    pub(crate) window_resets: IntCounter,

    pub(crate) events_observed: IntCounterVec,
    pub(crate) events_skipped: IntCounter,
    pub(crate) sweep_outcomes: IntCounterVec,
    pub(crate) sweep_errors: IntCounterVec,

    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_node_connected: IntGauge,

    pub(crate) latest_block: IntGauge,
    pub(crate) account_balance: GaugeVec,
    pub(crate) subscription_reconnects: IntCounter,
}

impl SweeperMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            requests_received: register_int_counter_vec_with_registry!(
                "sweeper_requests_received",
                "Total number of requests received in Server, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_ok: register_int_counter_vec_with_registry!(
                "sweeper_requests_ok",
                "Total number of ok requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            err_requests: register_int_counter_vec_with_registry!(
                "sweeper_err_requests",
                "Total number of erred requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_inflight: register_int_gauge_vec_with_registry!(
                "sweeper_requests_inflight",
                "Total number of inflight requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            cycles_total: register_int_counter_with_registry!(
                "sweeper_cycles_total",
                "Total number of scan-and-forward cycles started",
                registry,
            )
            .unwrap(),
            cycles_failed: register_int_counter_vec_with_registry!(
                "sweeper_cycles_failed",
                "Total number of aborted cycles, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            last_checked_block: register_int_gauge_with_registry!(
                "sweeper_last_checked_block",
                "The persisted scan checkpoint",
                registry,
            )
            .unwrap(),
            window_resets: register_int_counter_with_registry!(
                "sweeper_window_resets",
                "Number of scans where a stale or missing checkpoint was replaced by the recent window",
                registry,
            )
            .unwrap(),
            events_observed: register_int_counter_vec_with_registry!(
                "sweeper_events_observed",
                "Incoming transfers observed, by source (scan or live)",
                &["source"],
                registry,
            )
            .unwrap(),
            events_skipped: register_int_counter_with_registry!(
                "sweeper_events_skipped",
                "Incoming transfers skipped because they were already claimed",
                registry,
            )
            .unwrap(),
            sweep_outcomes: register_int_counter_vec_with_registry!(
                "sweeper_sweep_outcomes",
                "Sweep attempts, by outcome status",
                &["status"],
                registry,
            )
            .unwrap(),
            sweep_errors: register_int_counter_vec_with_registry!(
                "sweeper_sweep_errors",
                "Sweep errors, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "sweeper_eth_rpc_queries",
                "Total number of queries issued to eth provider, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "sweeper_eth_rpc_queries_latency",
                "Latency of queries issued to eth provider, by request type",
                &["type"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "sweeper_eth_node_connected",
                "Whether the last eth RPC request succeeded (1) or failed (0)",
                registry,
            )
            .unwrap(),
            latest_block: register_int_gauge_with_registry!(
                "sweeper_latest_block",
                "Latest block height seen by the health check",
                registry,
            )
            .unwrap(),
            account_balance: register_gauge_vec_with_registry!(
                "sweeper_account_balance",
                "Balance of the monitored account in display units, by asset",
                &["asset"],
                registry,
            )
            .unwrap(),
            subscription_reconnects: register_int_counter_with_registry!(
                "sweeper_subscription_reconnects",
                "Number of times the live subscription was re-established",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once_per_registry() {
        let registry = Registry::new();
        let metrics = SweeperMetrics::new(&registry);
        metrics.cycles_total.inc();
        metrics
            .sweep_outcomes
            .with_label_values(&["processed"])
            .inc();
        metrics.account_balance.with_label_values(&["native"]).set(0.5);

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "sweeper_cycles_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "sweeper_sweep_outcomes"));

        // same names in a second registry are fine
        let other = SweeperMetrics::new_for_testing();
        assert_eq!(other.cycles_total.get(), 0);
        assert_eq!(metrics.cycles_total.get(), 1);
    }
}
