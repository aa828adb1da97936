//! The JSON wire contract: exact field names, omitted payload fields, and
//! tolerance for the shapes agents and servers actually exchange.

use metron_core::envelope;
use metron_core::{Metric, MetricKind};
use serde_json::{Value, json};

#[test]
fn counter_serializes_with_type_and_delta_only() {
    let metric = Metric::counter("PollCount", 42);
    let value: Value = serde_json::to_value(&metric).unwrap();

    assert_eq!(value, json!({"id": "PollCount", "type": "counter", "delta": 42}));
}

#[test]
fn gauge_serializes_with_type_and_value_only() {
    let metric = Metric::gauge("FreeMemory", 1024.5);
    let value: Value = serde_json::to_value(&metric).unwrap();

    assert_eq!(value, json!({"id": "FreeMemory", "type": "gauge", "value": 1024.5}));
}

#[test]
fn kind_names_are_lowercase_on_the_wire() {
    assert_eq!(serde_json::to_value(MetricKind::Gauge).unwrap(), json!("gauge"));
    assert_eq!(
        serde_json::to_value(MetricKind::Counter).unwrap(),
        json!("counter")
    );
}

#[test]
fn unknown_kind_is_rejected() {
    let result: Result<Metric, _> =
        serde_json::from_value(json!({"id": "x", "type": "histogram", "value": 1.0}));
    assert!(result.is_err());
}

#[test]
fn missing_payload_fields_deserialize_as_none() {
    // the /value/ lookup body carries only id and type
    let metric: Metric = serde_json::from_value(json!({"id": "x", "type": "gauge"})).unwrap();
    assert_eq!(metric.delta, None);
    assert_eq!(metric.value, None);
}

#[test]
fn batch_is_a_plain_json_array() {
    let batch = vec![Metric::counter("a", 1), Metric::gauge("b", 2.0)];
    let value: Value = serde_json::to_value(&batch).unwrap();

    assert_eq!(
        value,
        json!([
            {"id": "a", "type": "counter", "delta": 1},
            {"id": "b", "type": "gauge", "value": 2.0},
        ])
    );
}

#[test]
fn snapshot_shape_matches_wire_elements() {
    // the on-disk snapshot maps id to the same document the wire carries
    let snapshot: std::collections::HashMap<String, Metric> = serde_json::from_value(json!({
        "hits": {"id": "hits", "type": "counter", "delta": 15},
        "temp": {"id": "temp", "type": "gauge", "value": 19.0},
    }))
    .unwrap();

    assert_eq!(snapshot["hits"], Metric::counter("hits", 15));
    assert_eq!(snapshot["temp"], Metric::gauge("temp", 19.0));
}

#[test]
fn compressed_batch_envelope_survives_the_full_cycle() {
    let batch = vec![
        Metric::gauge("CPUutilization1", 12.5),
        Metric::gauge("RandomValue", 0.25),
        Metric::counter("PollCount", 3),
    ];

    let body = envelope::encode_batch(&batch).unwrap();
    let decoded: Vec<Metric> =
        serde_json::from_slice(&envelope::decompress(&body).unwrap()).unwrap();

    assert_eq!(decoded, batch);
}

#[test]
fn negative_and_extreme_values_round_trip() {
    let cases = vec![
        Metric::counter("down", -17),
        Metric::counter("max", i64::MAX),
        Metric::gauge("tiny", f64::MIN_POSITIVE),
        Metric::gauge("negative", -273.15),
    ];

    for metric in cases {
        let encoded = serde_json::to_vec(&metric).unwrap();
        let decoded: Metric = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, metric);
    }
}
