// tests/integration/query_test.rs

//! End-to-end query scenarios: scalar, tuple, set, and JSON results, typed
//! decoding, argument encoding, and transparent reconnects.

use peridot::errors::{ErrorKind, PeridotError};
use peridot::protocol::Cardinality;

use super::test_helpers::*;

#[tokio::test]
async fn query_single_int64() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 123",
        canned_int64(Cardinality::AtMostOne, &[123]),
    )]))
    .await;
    let client = test_client(&server);

    let value: Option<i64> = client.query_single("select 123", (), &token()).await.unwrap();
    assert_eq!(value, Some(123));
}

#[tokio::test]
async fn query_set_preserves_order() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select {1, 2}",
        canned_int64(Cardinality::Many, &[1, 2]),
    )]))
    .await;
    let client = test_client(&server);

    let values: Vec<i64> = client.query("select {1, 2}", (), &token()).await.unwrap();
    assert_eq!(values.first(), Some(&1));
    assert_eq!(values.last(), Some(&2));
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn query_json_returns_exact_document() {
    let expected = r#"[{"a" : 1}, {"a" : 2}]"#;
    let server = MockServer::spawn(Behavior::with_queries([(
        "select {(a := 1), (a := 2)}",
        canned_json(expected),
    )]))
    .await;
    let client = test_client(&server);

    let json = client
        .query_json("select {(a := 1), (a := 2)}", (), &token())
        .await
        .unwrap();
    assert_eq!(&*json, expected);
}

#[tokio::test]
async fn tuple_decodes_into_rust_tuple() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select (1, 2)",
        canned_tuple2(1, 2),
    )]))
    .await;
    let client = test_client(&server);

    let pair: (i64, i64) = client
        .query_required_single("select (1, 2)", (), &token())
        .await
        .unwrap();
    assert_eq!(pair, (1, 2));
}

#[tokio::test]
async fn named_tuple_decodes_positionally_into_same_shape() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select (one := 1, two := 2)",
        canned_named_tuple2(1, 2),
    )]))
    .await;
    let client = test_client(&server);

    let pair: (i64, i64) = client
        .query_required_single("select (one := 1, two := 2)", (), &token())
        .await
        .unwrap();
    assert_eq!(pair, (1, 2));
}

#[tokio::test]
async fn positional_argument_round_trip() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select <str>$0 ++ '!'",
        canned_str_with_arg("hello!"),
    )]))
    .await;
    let client = test_client(&server);

    let value: String = client
        .query_required_single("select <str>$0 ++ '!'", ("hello",), &token())
        .await
        .unwrap();
    assert_eq!(value, "hello!");
}

#[tokio::test]
async fn facade_derivation_leaves_parent_untouched() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    let derived = client
        .with_config([("allow_bare_ddl", peridot::Value::Str("AlwaysAllow".into()))])
        .with_module("test_module");

    assert_eq!(derived.session_state().module(), Some("test_module"));
    assert!(derived.session_state().config().contains_key("allow_bare_ddl"));
    assert_eq!(client.session_state().module(), None);
    assert!(client.session_state().config().is_empty());
}

#[tokio::test]
async fn state_ships_with_derived_facade() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 7",
        canned_int64(Cardinality::AtMostOne, &[7]),
    )]))
    .await;
    let client = test_client(&server).with_module("test_module");

    let value: Option<i64> = client.query_single("select 7", (), &token()).await.unwrap();
    assert_eq!(value, Some(7));
}

#[tokio::test]
async fn reconnects_transparently_after_disconnect() {
    let greeting = "Hello, EdgeDB!";
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 'Hello, EdgeDB!'",
        canned_str(Cardinality::AtMostOne, greeting),
    )]))
    .await;
    let client = test_client(&server);

    // Establish a pooled connection, then cut it server-side.
    client.ensure_connected(&token()).await.unwrap();
    server.kill_connections();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let value: String = client
        .query_required_single("select 'Hello, EdgeDB!'", (), &token())
        .await
        .unwrap();
    assert_eq!(value, greeting);
}

#[tokio::test]
async fn server_error_surfaces_as_execution_kind() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    let err = client
        .query::<i64>("select nonsense", (), &token())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(matches!(err, PeridotError::Server(ref e) if e.code == 0x0300_0000));
}

#[tokio::test]
async fn ping_round_trips_on_a_pooled_connection() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);
    client.ping(&token()).await.unwrap();
    assert_eq!(client.pool().size(), 1);
}

#[tokio::test]
async fn repeated_query_hits_the_codec_cache() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 123",
        canned_int64(Cardinality::AtMostOne, &[123]),
    )]))
    .await;
    let client = test_client(&server);

    for _ in 0..3 {
        let value: Option<i64> =
            client.query_single("select 123", (), &token()).await.unwrap();
        assert_eq!(value, Some(123));
    }
}
