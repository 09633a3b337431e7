//! Prometheus metrics for the pod subscriber (§6 Observability).
//!
//! One [`SubscriberMetrics`] is registered against the process-wide
//! `Registry` the `kvroute` crate's store singleton owns; every pod
//! subscriber shares the same metric family and is distinguished by the
//! `pod_key` label.

use kvroute_core::error::{Result, SyncError};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Metric family shared by every pod subscriber in the process.
pub struct SubscriberMetrics {
    pub connections_total: IntCounterVec,
    pub disconnections_total: IntCounterVec,
    pub reconnect_attempts_total: IntCounterVec,
    pub events_received_total: IntCounterVec,
    pub events_processed_total: IntCounterVec,
    pub processing_duration_seconds: HistogramVec,
    pub missed_events_total: IntCounterVec,
    pub replay_requests_total: IntCounterVec,
    pub replay_success_total: IntCounterVec,
    pub replay_failure_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub connection_status: IntGaugeVec,
    pub last_sequence: IntGaugeVec,
}

impl SubscriberMetrics {
    /// Build and register every metric against `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let pod_label = ["pod_key"];
        let pod_type_label = ["pod_key", "type"];
        let pod_kind_label = ["pod_key", "kind"];

        let connections_total = register_counter_vec(
            registry,
            "kvroute_subscriber_connections_total",
            "Number of successful subscriber connections.",
            &pod_label,
        )?;
        let disconnections_total = register_counter_vec(
            registry,
            "kvroute_subscriber_disconnections_total",
            "Number of subscriber disconnections.",
            &pod_label,
        )?;
        let reconnect_attempts_total = register_counter_vec(
            registry,
            "kvroute_subscriber_reconnect_attempts_total",
            "Number of reconnect attempts made.",
            &pod_label,
        )?;
        let events_received_total = register_counter_vec(
            registry,
            "kvroute_subscriber_events_received_total",
            "Number of events received on the event channel, by type.",
            &pod_type_label,
        )?;
        let events_processed_total = register_counter_vec(
            registry,
            "kvroute_subscriber_events_processed_total",
            "Number of events successfully dispatched, by type.",
            &pod_type_label,
        )?;
        let missed_events_total = register_counter_vec(
            registry,
            "kvroute_subscriber_missed_events_total",
            "Number of events known-missed due to a sequence gap.",
            &pod_label,
        )?;
        let replay_requests_total = register_counter_vec(
            registry,
            "kvroute_subscriber_replay_requests_total",
            "Number of replay requests issued.",
            &pod_label,
        )?;
        let replay_success_total = register_counter_vec(
            registry,
            "kvroute_subscriber_replay_success_total",
            "Number of replay requests that returned a response in time.",
            &pod_label,
        )?;
        let replay_failure_total = register_counter_vec(
            registry,
            "kvroute_subscriber_replay_failure_total",
            "Number of replay requests that timed out or errored.",
            &pod_label,
        )?;
        let errors_total = register_counter_vec(
            registry,
            "kvroute_subscriber_errors_total",
            "Number of errors encountered, by kind.",
            &pod_kind_label,
        )?;

        let connection_status = register_gauge_vec(
            registry,
            "kvroute_subscriber_connection_status",
            "Current connection status (1 = connected, 0 = not connected).",
            &pod_label,
        )?;
        let last_sequence = register_gauge_vec(
            registry,
            "kvroute_subscriber_last_sequence",
            "Last sequence id dispatched downstream.",
            &pod_label,
        )?;

        let processing_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "kvroute_subscriber_processing_duration_seconds",
                "Event processing duration.",
            )
            .buckets(vec![
                0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
            &pod_type_label,
        )
        .map_err(|e| SyncError::config(format!("failed to build histogram: {e}")))?;
        registry
            .register(Box::new(processing_duration_seconds.clone()))
            .map_err(|e| SyncError::config(format!("failed to register histogram: {e}")))?;

        Ok(Self {
            connections_total,
            disconnections_total,
            reconnect_attempts_total,
            events_received_total,
            events_processed_total,
            processing_duration_seconds,
            missed_events_total,
            replay_requests_total,
            replay_success_total,
            replay_failure_total,
            errors_total,
            connection_status,
            last_sequence,
        })
    }
}

fn register_counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let metric = IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| SyncError::config(format!("failed to build counter {name}: {e}")))?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| SyncError::config(format!("failed to register counter {name}: {e}")))?;
    Ok(metric)
}

fn register_gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let metric = IntGaugeVec::new(Opts::new(name, help), labels)
        .map_err(|e| SyncError::config(format!("failed to build gauge {name}: {e}")))?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| SyncError::config(format!("failed to register gauge {name}: {e}")))?;
    Ok(metric)
}
