//! Integration tests for the HTTP transport and the Beat WebSocket stream
//!
//! The transport is pointed at a mockito node and at a local tokio-tungstenite
//! server, so status mapping, header validation and stream framing run over
//! real sockets.

use crate::mock_infrastructure::{
    block_id, chain_block, create_test_beat, now, quiet_tracker, within, MockBeatServer,
    NodeMockBuilder, GENESIS_ID,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use vigil_core::{
    chain::Beat,
    driver::{Driver, LocalDriver},
    transport::{
        GenesisValidator, HttpTransport, Method, RequestOptions, StreamReader, Transport,
        TransportError,
    },
    types::Revision,
};

const ADDRESS: &str = "0x7567d83b7b8d80addcb281a71d54fc7b3364ffed";

#[tokio::test]
async fn test_request_decodes_json_body() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_block("best", &chain_block(7, 0));
    let transport = HttpTransport::new(&node.url()).unwrap();

    let block = transport.request(Method::Get, "blocks/best", RequestOptions::default()).await;
    assert_eq!(block.unwrap()["id"], block_id(7));
    node.assert_all();
}

#[tokio::test]
async fn test_request_sends_revision_query() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_account(ADDRESS, &block_id(7), &json!({"balance": "0x64", "hasCode": false}));
    let transport = HttpTransport::new(&node.url()).unwrap();

    let query = [("revision", block_id(7))];
    let options = RequestOptions { query: &query, ..Default::default() };
    let account =
        transport.request(Method::Get, &format!("accounts/{ADDRESS}"), options).await.unwrap();
    assert_eq!(account["balance"], "0x64");
    node.assert_all();
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_post("logs/event", &json!({"order": "desc"}), &json!([{"topics": []}]));
    let transport = HttpTransport::new(&node.url()).unwrap();

    let body = json!({"criteriaSet": [], "order": "desc"});
    let options = RequestOptions { body: Some(&body), ..Default::default() };
    let logs = transport.request(Method::Post, "logs/event", options).await.unwrap();
    assert_eq!(logs.as_array().map(Vec::len), Some(1));
    node.assert_all();
}

#[tokio::test]
async fn test_genesis_header_is_validated() {
    let mut node = NodeMockBuilder::new().await;
    node.with_genesis_header(GENESIS_ID).mock_block("best", &chain_block(7, 0));
    let transport = HttpTransport::new(&node.url()).unwrap();

    let matching = GenesisValidator::new(&GENESIS_ID.to_uppercase());
    let options = RequestOptions { validator: Some(&matching), ..Default::default() };
    assert!(transport.request(Method::Get, "blocks/best", options).await.is_ok());

    let other = GenesisValidator::new("0xdeadbeef");
    let options = RequestOptions { validator: Some(&other), ..Default::default() };
    match transport.request(Method::Get, "blocks/best", options).await {
        Err(TransportError::GenesisMismatch { expected, actual }) => {
            assert_eq!(expected, "0xdeadbeef");
            assert_eq!(actual, GENESIS_ID);
        }
        other => panic!("expected a genesis mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_status_codes_map_to_error_classes() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_status("blocks/best", 503, "node syncing")
        .mock_status("accounts/0xabc", 404, "not found");
    let transport = HttpTransport::new(&node.url()).unwrap();

    let err = transport
        .request(Method::Get, "blocks/best", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(&err, TransportError::HttpError(503, body) if body == "node syncing"));
    assert!(err.is_transient());

    let err = transport
        .request(Method::Get, "accounts/0xabc", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::HttpError(404, _)));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_undecodable_body_is_invalid_response() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_garbage("blocks/best");
    let transport = HttpTransport::new(&node.url()).unwrap();

    let err = transport
        .request(Method::Get, "blocks/best", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::InvalidResponse(_)));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_unreachable_node_is_transient() {
    let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
    let err = transport
        .request(Method::Get, "blocks/best", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn test_local_driver_over_http() {
    let mut node = NodeMockBuilder::new().await;
    node.with_genesis_header(GENESIS_ID)
        .mock_block("0", &chain_block(0, 0))
        .mock_block("best", &chain_block(7, 0))
        .mock_account(ADDRESS, &block_id(7), &json!({"balance": "0x64", "hasCode": false}));
    let transport = Arc::new(HttpTransport::new(&node.url()).unwrap());

    let driver = LocalDriver::builder()
        .tracker_config(quiet_tracker())
        .expect_genesis(GENESIS_ID)
        .connect(transport as Arc<dyn Transport>)
        .await
        .unwrap();
    assert_eq!(driver.genesis().id, GENESIS_ID);
    assert_eq!(driver.head().number, 7);

    let account = driver.get_account(ADDRESS, Revision::best()).await.unwrap();
    assert_eq!(account["balance"], "0x64");
    driver.close();
}

#[tokio::test]
async fn test_beat_stream_reads_messages_until_close() {
    let server = MockBeatServer::new().await.unwrap();
    let transport = HttpTransport::new(&server.http_url()).unwrap();

    let path = format!("subscriptions/beat?pos={}", block_id(11));
    let mut stream = transport.open_stream(&path).await.unwrap();
    let requested = server.wait_for_client(Duration::from_secs(5)).await.unwrap();
    assert_eq!(requested, format!("/{path}"));

    let beat = create_test_beat(12, now());
    server.send_beat(&beat);
    let text = within(stream.next_message()).await.unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Beat>(&text).unwrap(), beat);

    server.send_close();
    assert!(within(stream.next_message()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_beat_stream_to_missing_server_fails() {
    let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
    let err = transport.open_stream("subscriptions/beat").await.unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}
