//! Integration tests for head tracking
//!
//! Drives the tracker of a `LocalDriver` through a scripted node: polling,
//! promotion to the Beat stream, obsolete beats and fallback after the stream
//! ends.

use crate::mock_infrastructure::{
    block_id, chain_block, create_test_beat, fast_tracker, now, within, MockTransport,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use vigil_core::{
    cache::CacheKind,
    chain::TrackerConfig,
    driver::{Driver, DriverError, LocalDriver},
    transport::{Transport, TransportError},
    types::Head,
};

async fn connect(node: &Arc<MockTransport>, config: TrackerConfig) -> Arc<LocalDriver> {
    let driver = LocalDriver::builder()
        .tracker_config(config)
        .connect(Arc::clone(node) as Arc<dyn Transport>)
        .await
        .expect("driver connects");
    Arc::new(driver)
}

/// Spawns a `poll_head` caller and gives it time to register.
async fn spawn_waiter(driver: &Arc<LocalDriver>) -> JoinHandle<Result<Arc<Head>, DriverError>> {
    let driver = Arc::clone(driver);
    let waiter = tokio::spawn(async move { driver.poll_head().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    waiter
}

#[tokio::test]
async fn test_polled_head_resolves_every_waiter() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
    let driver = connect(&node, fast_tracker(100)).await;

    let first = spawn_waiter(&driver).await;
    let second = spawn_waiter(&driver).await;
    node.respond("blocks/best", chain_block(11, 0));

    let first = within(first).await.unwrap().unwrap();
    let second = within(second).await.unwrap().unwrap();
    assert_eq!(first.number, 11);
    assert_eq!(second.id, first.id);
    assert_eq!(driver.head().number, 11);
    assert_eq!(driver.head_state().accepted_count(), 1);
    driver.close();
}

#[tokio::test]
async fn test_lower_or_repeated_head_is_rejected() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
    let driver = connect(&node, fast_tracker(100)).await;

    node.respond("blocks/best", chain_block(9, 0));
    let polls = node.count("blocks/best");
    within(async {
        while node.count("blocks/best") < polls + 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert_eq!(driver.head().number, 10);
    assert_eq!(driver.head_state().accepted_count(), 0);
    driver.close();
}

#[tokio::test]
async fn test_concurrent_waiters_share_the_tracker_loop() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
    let config = TrackerConfig { poll_interval_ms: 200, ..Default::default() };
    let driver = connect(&node, config).await;

    let waiters: Vec<_> = (0..32)
        .map(|_| {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.poll_head().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let polls_before = node.count("blocks/best");
    node.respond("blocks/best", chain_block(11, 0));

    for waiter in waiters {
        assert_eq!(within(waiter).await.unwrap().unwrap().number, 11);
    }
    // One loop polls for everybody: the advance took one poll, two at most if
    // the next interval elapsed while the waiters were collected.
    let polls = node.count("blocks/best") - polls_before;
    assert!((1..=2).contains(&polls), "{polls} polls for one head advance");
    driver.close();
}

#[tokio::test]
async fn test_fresh_heads_promote_to_beat_stream() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, now()));
    node.enable_beats();
    let driver = connect(&node, fast_tracker(1)).await;

    node.respond("blocks/best", chain_block(11, now()));
    within(node.wait_for_streams(1)).await;
    assert_eq!(node.stream_paths()[0], format!("subscriptions/beat?pos={}", block_id(10)));

    let waiter = spawn_waiter(&driver).await;
    assert!(node.push_beat(&create_test_beat(12, now())));
    let head = within(waiter).await.unwrap().unwrap();
    assert_eq!(head.number, 12);
    assert_eq!(head.id, block_id(12));
    assert_eq!(head.parent_id, block_id(11));
    driver.close();
}

#[tokio::test]
async fn test_stale_heads_never_open_the_stream() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
    node.enable_beats();
    let driver = connect(&node, fast_tracker(1)).await;

    let waiter = spawn_waiter(&driver).await;
    node.respond("blocks/best", chain_block(11, 0));
    within(waiter).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(node.stream_paths().is_empty());
    driver.close();
}

#[tokio::test]
async fn test_obsolete_beat_is_ignored() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, now()));
    node.enable_beats();
    let driver = connect(&node, fast_tracker(1)).await;
    node.respond("blocks/best", chain_block(11, now()));
    within(node.wait_for_streams(1)).await;

    let waiter = spawn_waiter(&driver).await;
    let mut obsolete = create_test_beat(13, now());
    obsolete.obsolete = true;
    assert!(node.push_beat(&obsolete));
    assert!(node.push_beat(&create_test_beat(12, now())));

    assert_eq!(within(waiter).await.unwrap().unwrap().number, 12);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.head().number, 12);
    driver.close();
}

#[tokio::test]
async fn test_stream_close_falls_back_to_polling() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, now()));
    node.enable_beats();
    let driver = connect(&node, fast_tracker(1)).await;
    node.respond("blocks/best", chain_block(11, now()));
    within(node.wait_for_streams(1)).await;

    let polls = node.count("blocks/best");
    node.respond("blocks/best", chain_block(13, now()));
    let waiter = spawn_waiter(&driver).await;
    node.close_beats();

    assert_eq!(within(waiter).await.unwrap().unwrap().number, 13);
    assert!(node.count("blocks/best") > polls);
    // The fresh polled head promotes again from the new position.
    within(node.wait_for_streams(2)).await;
    assert_eq!(node.stream_paths()[1], format!("subscriptions/beat?pos={}", block_id(12)));
    driver.close();
}

#[tokio::test]
async fn test_stream_failure_falls_back_to_polling() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, now()));
    node.enable_beats();
    let driver = connect(&node, fast_tracker(1)).await;
    node.respond("blocks/best", chain_block(11, now()));
    within(node.wait_for_streams(1)).await;

    node.respond("blocks/best", chain_block(12, now()));
    let waiter = spawn_waiter(&driver).await;
    assert!(node.push_message(Err(TransportError::WebSocket("reset by peer".into()))));

    assert_eq!(within(waiter).await.unwrap().unwrap().number, 12);
    driver.close();
}

#[tokio::test]
async fn test_undecodable_beat_ends_the_stream() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, now()));
    node.enable_beats();
    let driver = connect(&node, fast_tracker(1)).await;
    node.respond("blocks/best", chain_block(11, now()));
    within(node.wait_for_streams(1)).await;

    node.respond("blocks/best", chain_block(12, now()));
    assert!(node.push_message(Ok("{not a beat".into())));
    within(node.wait_for_streams(2)).await;
    assert_eq!(driver.head().number, 12);
    driver.close();
}

#[tokio::test]
async fn test_poll_errors_are_retried_and_never_surface() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
    let driver = connect(&node, fast_tracker(100)).await;

    node.fail("blocks/best", 3);
    let waiter = spawn_waiter(&driver).await;
    node.respond("blocks/best", chain_block(11, 0));

    assert_eq!(within(waiter).await.unwrap().unwrap().number, 11);
    driver.close();
}

#[tokio::test]
async fn test_close_stops_the_tracker() {
    let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
    let driver = connect(&node, fast_tracker(100)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let waiter = spawn_waiter(&driver).await;
    driver.close();
    driver.close();
    within(driver.join()).await;

    let err = within(waiter).await.unwrap().unwrap_err();
    assert!(err.is_interrupted());
    let polls = node.count("blocks/best");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.count("blocks/best"), polls);
}

#[tokio::test]
async fn test_head_advance_keeps_pinned_entries() {
    let genesis = json!({"id": "0xG", "number": 0, "parentID": "0xff", "timestamp": 0});
    let before = json!({"id": "0x9", "number": 4, "parentID": "0x8", "timestamp": 0});
    let node = MockTransport::with_chain(&genesis, &before);
    let driver = connect(&node, fast_tracker(100)).await;
    assert_eq!(driver.genesis().id, "0xG");

    let pinned = Arc::new(json!({"id": "0xA", "note": "fetched for another revision"}));
    driver.cache().insert_pinned(CacheKind::Block, "0xA", "0xA", Arc::clone(&pinned));

    let first = spawn_waiter(&driver).await;
    let second = spawn_waiter(&driver).await;
    let best = json!({"id": "0xA", "number": 5, "parentID": "0x9", "timestamp": 0});
    node.respond("blocks/best", best);

    for waiter in [first, second] {
        let head = within(waiter).await.unwrap().unwrap();
        assert_eq!(head.id, "0xa");
        assert_eq!(head.number, 5);
    }
    assert_eq!(driver.head().id, "0xa");
    assert_eq!(driver.cache().get_pinned(CacheKind::Block, "0xA", "0xA"), Some(pinned));
    driver.close();
}
