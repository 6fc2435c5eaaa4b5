//! Mock Beat WebSocket Server
//!
//! Serves `subscriptions/beat` over a real WebSocket so the tokio-tungstenite
//! stream reader is exercised end to end.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
};
use vigil_core::chain::Beat;

/// A mock Beat server on a random local port.
pub struct MockBeatServer {
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Message>,
    request_paths: Arc<Mutex<Vec<String>>>,
    server_handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockBeatServer {
    /// Binds the server. Queued messages go to the first client that connects.
    ///
    /// # Errors
    ///
    /// Returns an error if no local port can be bound.
    pub async fn new() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (outgoing, queue) = mpsc::unbounded_channel();
        let request_paths = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let server_handle = tokio::spawn(Self::run(
            listener,
            queue,
            Arc::clone(&request_paths),
            shutdown_tx.subscribe(),
        ));

        Ok(Self { addr, outgoing, request_paths, server_handle, shutdown_tx })
    }

    async fn run(
        listener: TcpListener,
        mut queue: mpsc::UnboundedReceiver<Message>,
        request_paths: Arc<Mutex<Vec<String>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    if let Ok((stream, _)) = result {
                        Self::handle_connection(stream, &mut queue, &request_paths).await;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        queue: &mut mpsc::UnboundedReceiver<Message>,
        request_paths: &Mutex<Vec<String>>,
    ) {
        let record = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            request_paths.lock().push(request.uri().to_string());
            Ok(response)
        };
        let Ok(ws_stream) = accept_hdr_async(stream, record).await else { return };
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                Some(message) = queue.recv() => {
                    let closing = matches!(message, Message::Close(_));
                    if write.send(message).await.is_err() || closing {
                        return;
                    }
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Base URL a transport should use to reach this server.
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queues `beat` for the connected client.
    pub fn send_beat(&self, beat: &Beat) {
        let text = serde_json::to_string(beat).unwrap_or_default();
        let _ = self.outgoing.send(Message::Text(text.into()));
    }

    /// Queues a close frame; the connection ends after it is sent.
    pub fn send_close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }

    /// Waits until a client connected, returning its request path.
    pub async fn wait_for_client(&self, timeout: Duration) -> Option<String> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if let Some(path) = self.request_paths.lock().first().cloned() {
                return Some(path);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }
}

impl Drop for MockBeatServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.server_handle.abort();
    }
}
