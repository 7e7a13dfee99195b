mod common;

use common::{connected, fast_config, harness, message, wait_for_polls, wait_for_state};
use growstudio::mqtt::ConnectionState;
use growstudio::reservoir::telemetry::{EC, PH};
use growstudio::reservoir::REQUEST_TIMED_OUT;
use serde_json::json;
use std::time::Duration;

const TELEMETRY: &str = "ReservoirController/telemetry";
const RESPONSE: &str = "ReservoirController/rpc/response";

#[tokio::test]
async fn doser_count_round_trip() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();
    h.script.send(connected()).unwrap();
    wait_for_state(h.controller.session().state_receiver(), ConnectionState::Connected).await;

    let id = h.controller.query_doser_count().unwrap();
    assert_eq!(id, 420);
    assert_eq!(
        h.publisher.requests(),
        vec![json!({"jsonrpc": "2.0", "id": 420, "method": "dosersCount"})]
    );
    assert_eq!(
        h.publisher.published.lock()[0].0,
        "ReservoirController/rpc/request"
    );

    h.script
        .send(message(RESPONSE, r#"{"jsonrpc":"2.0","id":420,"result":4}"#))
        .unwrap();
    wait_for_polls(&h.polls, 2).await;

    assert_eq!(h.controller.drain_and_route(), 1);
    assert_eq!(h.controller.doser_count(), Some(4));
    assert_eq!(h.controller.pending_requests(), 0);
}

#[tokio::test]
async fn duplicate_response_is_ignored() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();
    h.controller.query_doser_count().unwrap();

    h.script
        .send(message(RESPONSE, r#"{"jsonrpc":"2.0","id":420,"result":4}"#))
        .unwrap();
    h.script
        .send(message(RESPONSE, r#"{"jsonrpc":"2.0","id":420,"result":7}"#))
        .unwrap();
    wait_for_polls(&h.polls, 2).await;

    assert_eq!(h.controller.drain_and_route(), 2);
    assert_eq!(h.controller.doser_count(), Some(4));
}

#[tokio::test]
async fn malformed_telemetry_does_not_stop_the_drain() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();

    h.script.send(message(TELEMETRY, r#"{"ph":6.0}"#)).unwrap();
    h.script.send(message(TELEMETRY, r#"{"ph":"#)).unwrap();
    h.script.send(message(TELEMETRY, r#"{"ph":"six"}"#)).unwrap();
    h.script
        .send(message(TELEMETRY, r#"{"ph":6.4,"ec":1.8,"liquidLevel":"low"}"#))
        .unwrap();
    wait_for_polls(&h.polls, 4).await;

    assert_eq!(h.controller.drain_and_route(), 4);
    assert_eq!(h.controller.history(PH), vec![6.0, 6.4]);
    assert_eq!(h.controller.latest(EC), Some(1.8));
    assert_eq!(h.controller.liquid_level(), Some("low"));
}

#[tokio::test]
async fn error_only_response_queues_one_error() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();

    h.script
        .send(message(
            RESPONSE,
            r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32602,"message":"doser out of range"}}"#,
        ))
        .unwrap();
    wait_for_polls(&h.polls, 1).await;
    h.controller.drain_and_route();

    assert_eq!(h.controller.pending_errors(), 1);
    let error = h.controller.peek_fresh_error().cloned().unwrap();
    assert_eq!(error.code, -32602);
    assert_eq!(error.message, "doser out of range");
}

#[tokio::test]
async fn error_response_still_runs_the_handler() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();
    h.controller.query_doser_count().unwrap();

    h.script
        .send(message(RESPONSE, r#"{"jsonrpc":"2.0","id":420,"error":{}}"#))
        .unwrap();
    wait_for_polls(&h.polls, 1).await;
    h.controller.drain_and_route();

    assert_eq!(h.controller.pending_requests(), 0);
    assert_eq!(h.controller.doser_count(), None);
    let error = h.controller.peek_fresh_error().cloned().unwrap();
    assert_eq!((error.code, error.message.as_str()), (-1, "No message"));
}

#[tokio::test]
async fn junk_on_the_response_topic_is_dropped() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();
    h.controller.query_doser_count().unwrap();

    h.script
        .send(message(RESPONSE, r#"{"jsonrpc":"2.0","result":4}"#))
        .unwrap();
    h.script
        .send(message("ReservoirController/other", r#"{"ph":1.0}"#))
        .unwrap();
    h.script
        .send(message(RESPONSE, r#"{"jsonrpc":"2.0","id":420,"result":4}"#))
        .unwrap();
    wait_for_polls(&h.polls, 3).await;

    assert_eq!(h.controller.drain_and_route(), 3);
    assert_eq!(h.controller.doser_count(), Some(4));
    assert!(h.controller.history(PH).is_empty());
    assert_eq!(h.controller.pending_errors(), 0);
}

#[tokio::test]
async fn positional_arrays_never_resolve_or_record() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();
    h.controller.query_doser_count().unwrap();

    h.script.send(message(RESPONSE, "[420,4,null]")).unwrap();
    h.script.send(message(TELEMETRY, r#"[6.1,1.2,"ok"]"#)).unwrap();
    wait_for_polls(&h.polls, 2).await;

    assert_eq!(h.controller.drain_and_route(), 2);
    assert_eq!(h.controller.doser_count(), None);
    assert_eq!(h.controller.pending_requests(), 1);
    assert!(h.controller.history(PH).is_empty());
    assert_eq!(h.controller.liquid_level(), None);
}

#[tokio::test]
async fn string_error_code_still_reaches_the_queue() {
    let mut h = harness(fast_config());
    h.controller.connect().unwrap();
    h.controller.query_doser_count().unwrap();

    h.script
        .send(message(
            RESPONSE,
            r#"{"jsonrpc":"2.0","id":420,"error":{"code":"E42","message":"doser busy"}}"#,
        ))
        .unwrap();
    wait_for_polls(&h.polls, 1).await;
    h.controller.drain_and_route();

    assert_eq!(h.controller.pending_requests(), 0);
    let error = h.controller.peek_fresh_error().cloned().unwrap();
    assert_eq!((error.code, error.message.as_str()), (-1, "doser busy"));
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let mut config = fast_config();
    config.request_timeout_ms = Some(5);
    let mut h = harness(config);

    h.controller.query_doser_count().unwrap();
    assert_eq!(h.controller.pending_requests(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.controller.drain_and_route(), 0);

    assert_eq!(h.controller.pending_requests(), 0);
    let error = h.controller.peek_fresh_error().cloned().unwrap();
    assert_eq!(error.code, REQUEST_TIMED_OUT);
    assert!(error.message.contains("dosersCount"));
}

#[tokio::test]
async fn disabled_timeout_keeps_waiting() {
    let mut config = fast_config();
    config.request_timeout_ms = Some(0);
    let mut h = harness(config);

    h.controller.query_doser_count().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.controller.drain_and_route();
    assert_eq!(h.controller.pending_requests(), 1);
    assert!(h.controller.peek_fresh_error().is_none());
}
