//! End-to-end tests of the WebSocket driver host
//!
//! A `LocalDriver` on a scripted node is served by `serve_connections` on a
//! loopback port; clients connect with `WebSocketConnector`.

use crate::mock_infrastructure::{
    block_id, chain_block, fast_tracker, node_at, within, MockTransport, GENESIS_ID,
};
use serde_json::json;
use server::{serve_connections, SharedDriverAcceptor};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{io::AsyncWriteExt, net::TcpListener, task::JoinHandle};
use vigil_core::{
    driver::{Driver, LocalDriver},
    interrupt::InterruptToken,
    remote::{DriverHost, RemoteConfig, RemoteDriver, WebSocketConnector},
    transport::Transport,
    types::Revision,
};

struct RunningHost {
    addr: SocketAddr,
    shutdown: InterruptToken,
    handle: JoinHandle<()>,
    driver: Arc<LocalDriver>,
}

impl RunningHost {
    async fn start(node: &Arc<MockTransport>) -> Self {
        let driver = Arc::new(
            LocalDriver::builder()
                .tracker_config(fast_tracker(100))
                .connect(Arc::clone(node) as Arc<dyn Transport>)
                .await
                .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = InterruptToken::new();
        let acceptor = SharedDriverAcceptor::new(Arc::clone(&driver) as Arc<dyn Driver>);
        let host = DriverHost::new(Arc::new(acceptor), shutdown.child());
        let handle = tokio::spawn(serve_connections(listener, host, shutdown.clone()));
        Self { addr, shutdown, handle, driver }
    }

    async fn client(&self, genesis_id: Option<&str>) -> RemoteDriver {
        let connector = Arc::new(WebSocketConnector::new(format!("ws://{}", self.addr)));
        let config = RemoteConfig { reconnect_delay_seconds: 1, poll_retry_delay_seconds: 1 };
        RemoteDriver::connect(connector, genesis_id.map(str::to_string), config).await.unwrap()
    }
}

#[tokio::test]
async fn test_remote_driver_over_websocket() {
    let node = node_at(10);
    node.respond("accounts/0xabc", json!({"balance": "0x7"}));
    let host = RunningHost::start(&node).await;

    let remote = host.client(Some(GENESIS_ID)).await;
    assert_eq!(remote.genesis().id, GENESIS_ID);
    assert_eq!(remote.head().id, block_id(10));

    let account = remote.get_account("0xabc", Revision::best()).await.unwrap();
    assert_eq!(account["balance"], "0x7");

    node.respond("blocks/best", chain_block(11, 0));
    within(async {
        while remote.head().number < 11 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(remote.head().id, block_id(11));

    remote.close();
    host.shutdown.interrupt();
    within(host.handle).await.unwrap();
    host.driver.close();
}

#[tokio::test]
async fn test_clients_share_one_driver() {
    let node = node_at(10);
    node.respond("accounts/0xabc", json!({"balance": "0x7"}));
    let host = RunningHost::start(&node).await;

    let first = host.client(None).await;
    let second = host.client(None).await;
    first.get_account("0xabc", Revision::best()).await.unwrap();
    second.get_account("0xabc", Revision::best()).await.unwrap();
    assert_eq!(node.count("accounts/0xabc"), 1, "second client reads the shared cache");

    first.close();
    second.close();
    host.shutdown.interrupt();
    within(host.handle).await.unwrap();
    host.driver.close();
}

#[tokio::test]
async fn test_failed_handshake_keeps_listener_running() {
    let node = node_at(10);
    let host = RunningHost::start(&node).await;

    let mut raw = tokio::net::TcpStream::connect(host.addr).await.unwrap();
    raw.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    drop(raw);

    let remote = host.client(None).await;
    assert_eq!(remote.head().number, 10);

    remote.close();
    host.shutdown.interrupt();
    within(host.handle).await.unwrap();
    host.driver.close();
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let node = node_at(10);
    let host = RunningHost::start(&node).await;
    let remote = host.client(None).await;
    assert!(remote.is_connected());

    host.shutdown.interrupt();
    within(host.handle).await.unwrap();
    within(async {
        while remote.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let err = remote.get_account("0xabc", Revision::best()).await.unwrap_err();
    assert_eq!(err.kind(), "closed");
    remote.close();
    host.driver.close();
}
