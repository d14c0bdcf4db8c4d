//! Inbound frames: responses, fetch notifications and invocations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jet_rpc::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, Matcher, RpcError,
};
use serde_json::{Value, json};

use super::fixtures::{peer, recorder, request_id};
use crate::callbacks::{FetchCallback, MethodCallback, StateCallback};

const TIMEOUT: Duration = Duration::from_secs(5);

type Seen = Arc<Mutex<Vec<(String, Value)>>>;
type StateResult = Result<Option<Value>, RpcError>;

fn collecting_events() -> (FetchCallback, Arc<Mutex<Vec<Value>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: FetchCallback = Arc::new(move |event: Value| {
        sink.lock().unwrap().push(event);
    });
    (callback, events)
}

fn adding_one(seen: &Seen) -> MethodCallback {
    let seen = Arc::clone(seen);
    Arc::new(move |path: &str, args: Value| -> Result<Value, RpcError> {
        seen.lock().unwrap().push((path.to_string(), args.clone()));
        let n = args
            .as_i64()
            .ok_or_else(|| RpcError::invalid_params("expected a number"))?;
        Ok(json!(n + 1))
    })
}

fn exploding_method(_path: &str, _args: Value) -> Result<Value, RpcError> {
    panic!("method bug")
}

fn exploding_state(_path: &str, _value: Value) -> StateResult {
    panic!("state bug")
}

fn exploding_fetch(_event: Value) {
    panic!("fetch bug")
}

#[tokio::test]
async fn test_responses_reach_their_own_callbacks() {
    let peer = peer();
    let (first, first_seen) = recorder();
    let (second, second_seen) = recorder();
    let (third, third_seen) = recorder();

    peer.set("a", json!(1), first, TIMEOUT).unwrap();
    peer.set("b", json!(2), second, TIMEOUT).unwrap();
    peer.set("c", json!(3), third, TIMEOUT).unwrap();
    let ids: Vec<u64> = peer.transport().sent().iter().map(request_id).collect();

    peer.handle_frame(&json!({"jsonrpc": "2.0", "id": ids[1], "result": "b"}).to_string());
    peer.handle_frame(
        &json!({"jsonrpc": "2.0", "id": ids[2], "error": {"code": 1, "message": "no"}})
            .to_string(),
    );
    peer.handle_frame(&json!({"jsonrpc": "2.0", "id": ids[0], "result": "a"}).to_string());

    let first_seen = first_seen.lock().unwrap();
    assert_eq!(first_seen.len(), 1);
    assert!(first_seen[0].0);
    assert_eq!(first_seen[0].1["result"], "a");

    let second_seen = second_seen.lock().unwrap();
    assert_eq!(second_seen.len(), 1);
    assert_eq!(second_seen[0].1["result"], "b");

    let third_seen = third_seen.lock().unwrap();
    assert_eq!(third_seen.len(), 1);
    assert!(third_seen[0].0, "an error response still completes the request");
    assert_eq!(third_seen[0].1["error"]["code"], 1);

    assert_eq!(peer.pending_requests(), 0);
}

#[tokio::test]
async fn test_duplicate_and_unknown_responses_are_ignored() {
    let peer = peer();
    let (callback, responses) = recorder();
    peer.info(callback, TIMEOUT).unwrap();
    let id = request_id(&peer.transport().sent()[0]);

    let response = json!({"id": id, "result": {}}).to_string();
    peer.handle_frame(&response);
    peer.handle_frame(&response);
    peer.handle_frame(&json!({"id": id + 100, "result": {}}).to_string());

    assert_eq!(responses.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_notification_reaches_fetch_callback() {
    let peer = peer();
    let (on_event, events) = collecting_events();
    let id = peer
        .fetch(&Matcher::new().starts_with("theState"), on_event, None, TIMEOUT)
        .unwrap();

    let event = json!({"event": "change", "path": "theState", "value": 43});
    peer.handle_frame(&json!({"jsonrpc": "2.0", "method": id.get(), "params": event}).to_string());

    assert_eq!(*events.lock().unwrap(), vec![event]);
}

#[tokio::test]
async fn test_notifications_after_unfetch_are_dropped() {
    let peer = peer();
    let (on_event, events) = collecting_events();
    let id = peer.fetch(&Matcher::new(), on_event, None, TIMEOUT).unwrap();
    peer.unfetch(id, None, TIMEOUT).unwrap();

    peer.handle_frame(&json!({"method": id.get(), "params": {"event": "add"}}).to_string());
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notification_without_params_is_dropped() {
    let peer = peer();
    let (on_event, events) = collecting_events();
    let id = peer.fetch(&Matcher::new(), on_event, None, TIMEOUT).unwrap();

    peer.handle_frame(&json!({"method": id.get()}).to_string());
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_method_invocation_replies_with_result() {
    let peer = peer();
    let seen: Seen = Arc::default();
    peer.add_method("m", adding_one(&seen), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"m","id":7,"params":3}"#);

    assert_eq!(*seen.lock().unwrap(), vec![("m".to_string(), json!(3))]);
    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], 7);
    assert_eq!(sent[0]["result"], 4);
    assert!(sent[0].get("error").is_none());
}

#[tokio::test]
async fn test_method_error_becomes_error_response() {
    let peer = peer();
    let seen: Seen = Arc::default();
    peer.add_method("m", adding_one(&seen), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"m","id":"req-1","params":"three"}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent[0]["id"], "req-1");
    assert_eq!(sent[0]["error"]["code"], INVALID_PARAMS);
    assert_eq!(sent[0]["error"]["message"], "expected a number");
}

#[tokio::test]
async fn test_method_invocation_without_params() {
    let peer = peer();
    let seen: Seen = Arc::default();
    peer.add_method("m", adding_one(&seen), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"m","id":8}"#);

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(peer.transport().sent()[0]["error"]["code"], INVALID_PARAMS);
}

#[tokio::test]
async fn test_invocation_without_id_gets_no_reply() {
    let peer = peer();
    let seen: Seen = Arc::default();
    peer.add_method("m", adding_one(&seen), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"m","params":1}"#);

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(peer.transport().sent().is_empty());
}

#[tokio::test]
async fn test_state_set_replies_true() {
    let peer = peer();
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let on_set: StateCallback = Arc::new(move |path: &str, value: Value| -> StateResult {
        sink.lock().unwrap().push((path.to_string(), value));
        Ok(None)
    });
    peer.add_state("theState", json!(0), Some(on_set), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"theState","id":11,"params":{"value":5}}"#);

    assert_eq!(*seen.lock().unwrap(), vec![("theState".to_string(), json!(5))]);
    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], 11);
    assert_eq!(sent[0]["result"], true);
}

#[tokio::test]
async fn test_state_adopting_other_value_publishes_change_first() {
    let peer = peer();
    let clamp: StateCallback = Arc::new(|_path: &str, value: Value| -> StateResult {
        let n = value.as_i64().unwrap_or_default();
        Ok((n > 10).then(|| json!(10)))
    });
    peer.add_state("level", json!(0), Some(clamp), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"level","id":12,"params":{"value":50}}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["method"], "change");
    assert_eq!(sent[0]["params"], json!({"path": "level", "value": 10}));
    assert!(sent[0].get("id").is_none());
    assert_eq!(sent[1]["id"], 12);
    assert_eq!(sent[1]["result"], true);
}

#[tokio::test]
async fn test_state_rejecting_value() {
    let peer = peer();
    let reject: StateCallback = Arc::new(|_path: &str, _value: Value| -> StateResult {
        Err(RpcError::with_data(
            INVALID_PARAMS,
            "out of range",
            json!({"min": 0}),
        ))
    });
    peer.add_state("level", json!(0), Some(reject), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"level","id":13,"params":{"value":-1}}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["error"]["code"], INVALID_PARAMS);
    assert_eq!(sent[0]["error"]["message"], "out of range");
    assert_eq!(sent[0]["error"]["data"], json!({"min": 0}));
}

#[tokio::test]
async fn test_state_set_without_value() {
    let peer = peer();
    let on_set: StateCallback = Arc::new(|_path: &str, _value: Value| -> StateResult { Ok(None) });
    peer.add_state("theState", json!(0), Some(on_set), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"theState","id":14,"params":{}}"#);

    assert_eq!(peer.transport().sent()[0]["error"]["code"], INVALID_PARAMS);
}

#[tokio::test]
async fn test_set_on_fetch_only_state_is_rejected() {
    let peer = peer();
    peer.add_state("readOnly", json!(0), None, TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"readOnly","id":15,"params":{"value":1}}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent[0]["id"], 15);
    assert_eq!(sent[0]["error"]["code"], INVALID_REQUEST);
}

#[tokio::test]
async fn test_invocation_with_empty_method() {
    let peer = peer();
    peer.handle_frame(r#"{"method":"","id":16}"#);
    peer.handle_frame(r#"{"method":""}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], 16);
    assert_eq!(sent[0]["error"]["code"], METHOD_NOT_FOUND);
}

#[tokio::test]
async fn test_invocation_for_unowned_path_is_dropped() {
    let peer = peer();
    peer.handle_frame(r#"{"method":"someoneElse","id":17,"params":{"value":1}}"#);
    assert!(peer.transport().sent().is_empty());
}

#[tokio::test]
async fn test_batch_is_handled_in_order() {
    let peer = peer();
    let (on_event, events) = collecting_events();
    let id = peer.fetch(&Matcher::new(), on_event, None, TIMEOUT).unwrap();
    let (callback, responses) = recorder();
    peer.info(callback, TIMEOUT).unwrap();
    let request = request_id(&peer.transport().sent()[1]);

    let batch = json!([
        {"method": id.get(), "params": {"n": 1}},
        "not an object",
        {"id": request, "result": {"name": "jetd"}},
        {"method": id.get(), "params": {"n": 2}},
    ]);
    peer.handle_frame(&batch.to_string());

    assert_eq!(
        *events.lock().unwrap(),
        vec![json!({"n": 1}), json!({"n": 2})]
    );
    assert_eq!(responses.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_frames_are_discarded() {
    let peer = peer();
    let (callback, responses) = recorder();
    peer.info(callback, TIMEOUT).unwrap();
    peer.transport().take_sent();

    peer.handle_frame("{not json");
    peer.handle_frame("42");
    peer.handle_frame(r#"{"method":-3,"params":{}}"#);
    peer.handle_frame(r#"{"id":2.5,"result":true}"#);

    assert!(peer.transport().sent().is_empty());
    assert!(responses.lock().unwrap().is_empty());
    assert_eq!(peer.pending_requests(), 1);
}

#[tokio::test]
async fn test_panicking_method_gets_internal_error() {
    let peer = peer();
    let seen: Seen = Arc::default();
    peer.add_method("boom", Arc::new(exploding_method), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.add_method("m", adding_one(&seen), TIMEOUT, None, None, TIMEOUT)
        .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"boom","id":1,"params":{}}"#);
    peer.handle_frame(r#"{"method":"m","id":2,"params":1}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["id"], 1);
    assert_eq!(sent[0]["error"]["code"], INTERNAL_ERROR);
    assert_eq!(sent[1]["id"], 2);
    assert_eq!(sent[1]["result"], 2);
}

#[tokio::test]
async fn test_panicking_state_callback_gets_internal_error() {
    let peer = peer();
    peer.add_state(
        "fragile",
        json!(0),
        Some(Arc::new(exploding_state)),
        TIMEOUT,
        None,
        None,
        TIMEOUT,
    )
    .unwrap();
    peer.transport().take_sent();

    peer.handle_frame(r#"{"method":"fragile","id":3,"params":{"value":1}}"#);

    let sent = peer.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], 3);
    assert_eq!(sent[0]["error"]["code"], INTERNAL_ERROR);
}

#[tokio::test]
async fn test_panicking_fetch_callback_is_contained() {
    let peer = peer();
    let failing = peer
        .fetch(&Matcher::new(), Arc::new(exploding_fetch), None, TIMEOUT)
        .unwrap();
    let (on_event, events) = collecting_events();
    let healthy = peer.fetch(&Matcher::new(), on_event, None, TIMEOUT).unwrap();

    let batch = json!([
        {"method": failing.get(), "params": {"n": 1}},
        {"method": healthy.get(), "params": {"n": 2}},
    ]);
    peer.handle_frame(&batch.to_string());

    assert_eq!(*events.lock().unwrap(), vec![json!({"n": 2})]);
}
