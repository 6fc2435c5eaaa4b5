//! TCP accept loop upgrading every connection to a WebSocket channel.

use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tokio::{net::TcpListener, task::JoinSet};
use tracing::{debug, info, warn};
use vigil_core::{
    driver::{Driver, DriverError},
    interrupt::InterruptToken,
    remote::{Acceptor, Channel, DriverHost},
};

/// Hands the same driver to every client.
///
/// The host checks the client's genesis id against the driver's, so a client
/// expecting another network is refused before any call is served.
pub struct SharedDriverAcceptor {
    driver: Arc<dyn Driver>,
}

impl SharedDriverAcceptor {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }
}

impl fmt::Debug for SharedDriverAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDriverAcceptor")
            .field("genesis", &self.driver.genesis().id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Acceptor for SharedDriverAcceptor {
    async fn accept(
        &self,
        _genesis_id: Option<String>,
        token: &InterruptToken,
    ) -> Result<Arc<dyn Driver>, DriverError> {
        if token.is_interrupted() {
            return Err(DriverError::Interrupted);
        }
        Ok(Arc::clone(&self.driver))
    }
}

/// Accepts connections on `listener` until `shutdown` fires.
///
/// Each connection is upgraded with a WebSocket handshake and served by
/// `host` in its own task. Connections still open when `shutdown` fires are
/// torn down through the host's token before this returns.
pub async fn serve_connections(listener: TcpListener, host: DriverHost, shutdown: InterruptToken) {
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            biased;
            () = shutdown.interrupted() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let host = host.clone();
        connections.spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => {
                    debug!(%peer, "client connected");
                    host.serve(Channel::from_websocket(ws)).await;
                    debug!(%peer, "client disconnected");
                }
                Err(e) => warn!(%peer, error = %e, "websocket handshake failed"),
            }
        });
    }

    info!(open = connections.len(), "listener stopped");
    connections.shutdown().await;
}
