use wavy_telemetry::{
    TelemetryMetrics, metrics, new_session_id, record_delivery_failure, record_item_sent,
    record_received,
};

#[test]
fn session_ids_are_unique() {
    let first = new_session_id();
    let second = new_session_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn fresh_metrics_start_at_zero() {
    let snapshot = TelemetryMetrics::new().snapshot();
    assert_eq!(snapshot.received, 0);
    assert_eq!(snapshot.items_sent, 0);
}

#[test]
fn record_functions_increment_global_counters() {
    let before = metrics().snapshot();
    record_received();
    record_received();
    record_item_sent();
    record_delivery_failure();
    let after = metrics().snapshot();
    assert!(after.received >= before.received + 2);
    assert!(after.items_sent > before.items_sent);
    assert!(after.delivery_failures > before.delivery_failures);
}
