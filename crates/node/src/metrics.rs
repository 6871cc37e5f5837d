//! Prometheus metrics sink.
//!
//! Gauges and counters are registered on first use in a registry owned by
//! the sink, so several agents in one process never collide.

use arbiter_core::metrics::{
    STAKER_ACTION_FAILURE, STAKER_ACTION_LAST_SUCCESS, STAKER_ACTION_SUCCESS,
    STAKER_AMOUNT_STAKED, STAKER_BALANCE, STAKER_CONFIRMED_NODE, STAKER_STAKED_NODE,
};
use arbiter_core::Metrics;
use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};
use std::collections::HashMap;
use tracing::warn;

fn help(name: &str) -> &'static str {
    match name {
        STAKER_BALANCE => "Balance of the transaction sender, in ether",
        STAKER_AMOUNT_STAKED => "Amount staked by the validator wallet, in ether",
        STAKER_STAKED_NODE => "Latest node the validator wallet is staked on",
        STAKER_CONFIRMED_NODE => "Latest confirmed node",
        STAKER_ACTION_LAST_SUCCESS => "Unix time of the last successful staker action",
        STAKER_ACTION_SUCCESS => "Successful staker actions",
        STAKER_ACTION_FAILURE => "Failed staker actions",
        _ => "Staker metric",
    }
}

/// [`Metrics`] backed by a Prometheus registry.
#[derive(Default)]
pub struct PrometheusMetrics {
    registry: Registry,
    gauges: Mutex<HashMap<&'static str, Gauge>>,
    counters: Mutex<HashMap<&'static str, IntCounter>>,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metrics in a registry shared with other components.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            gauges: Mutex::default(),
            counters: Mutex::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode everything in the Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }

    /// Same as [`gather_text`](Self::gather_text) as raw bytes.
    pub fn gather_bytes(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }

    fn gauge(&self, name: &'static str) -> Option<Gauge> {
        let mut gauges = self.gauges.lock();
        if let Some(gauge) = gauges.get(name) {
            return Some(gauge.clone());
        }
        let gauge = match Gauge::new(name, help(name)) {
            Ok(gauge) => gauge,
            Err(e) => {
                warn!(metric = name, error = %e, "Invalid gauge");
                return None;
            }
        };
        if let Err(e) = self.registry.register(Box::new(gauge.clone())) {
            warn!(metric = name, error = %e, "Failed to register gauge");
            return None;
        }
        gauges.insert(name, gauge.clone());
        Some(gauge)
    }

    fn counter(&self, name: &'static str) -> Option<IntCounter> {
        let mut counters = self.counters.lock();
        if let Some(counter) = counters.get(name) {
            return Some(counter.clone());
        }
        let counter = match IntCounter::new(name, help(name)) {
            Ok(counter) => counter,
            Err(e) => {
                warn!(metric = name, error = %e, "Invalid counter");
                return None;
            }
        };
        if let Err(e) = self.registry.register(Box::new(counter.clone())) {
            warn!(metric = name, error = %e, "Failed to register counter");
            return None;
        }
        counters.insert(name, counter.clone());
        Some(counter)
    }
}

impl Metrics for PrometheusMetrics {
    fn update(&self, name: &'static str, value: f64) {
        if let Some(gauge) = self.gauge(name) {
            gauge.set(value);
        }
    }

    fn increment(&self, name: &'static str) {
        if let Some(counter) = self.counter(name) {
            counter.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_and_counters_exposed() {
        let metrics = PrometheusMetrics::new();
        metrics.update(STAKER_STAKED_NODE, 7.0);
        metrics.update(STAKER_STAKED_NODE, 9.0);
        metrics.increment(STAKER_ACTION_SUCCESS);
        metrics.increment(STAKER_ACTION_SUCCESS);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("# HELP staker_staked_node Latest node the validator wallet is staked on"));
        assert!(text.contains("staker_staked_node 9"));
        assert!(text.contains("staker_action_success 2"));
        assert!(!text.contains("staker_balance"));
    }

    #[test]
    fn test_name_clash_in_shared_registry_is_not_fatal() {
        let registry = Registry::new();
        let first = PrometheusMetrics::with_registry(registry.clone());
        let second = PrometheusMetrics::with_registry(registry);

        first.update(STAKER_BALANCE, 1.5);
        second.update(STAKER_BALANCE, 2.5);

        let text = first.gather_text().unwrap();
        assert!(text.contains("staker_balance 1.5"));
    }

    #[test]
    fn test_invalid_name_is_skipped() {
        let metrics = PrometheusMetrics::new();
        metrics.update("not a metric name", 1.0);
        assert!(metrics.gather_text().unwrap().is_empty());
    }
}
