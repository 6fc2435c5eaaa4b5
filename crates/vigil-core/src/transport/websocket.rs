use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::{net::TcpStream, time::Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream as TungsteniteStream,
};

use super::{StreamReader, TransportError};

/// Tracks consecutive push-channel failures.
///
/// After `max_consecutive_failures` failures in a row, attempts are suspended
/// until `failure_reset_duration` has elapsed since the last failure.
#[derive(Debug, Clone)]
pub struct StreamFailureTracker {
    consecutive_failures: u32,
    last_failure_time: Instant,
    max_consecutive_failures: u32,
    failure_reset_duration: Duration,
}

impl Default for StreamFailureTracker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(300))
    }
}

impl StreamFailureTracker {
    #[must_use]
    pub fn new(max_consecutive_failures: u32, failure_reset_duration: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            last_failure_time: Instant::now(),
            max_consecutive_failures,
            failure_reset_duration,
        }
    }

    /// Records a stream failure.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure_time = Instant::now();
    }

    /// Records a stream that delivered at least one message.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns whether stream attempts are currently suspended.
    ///
    /// Once the cooldown has elapsed the failure count is cleared.
    pub fn should_stop_retrying(&mut self) -> bool {
        if self.consecutive_failures < self.max_consecutive_failures {
            return false;
        }
        if self.last_failure_time.elapsed() >= self.failure_reset_duration {
            self.consecutive_failures = 0;
            return false;
        }
        true
    }

    /// Returns the current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Text-message reader over a tokio-tungstenite WebSocket.
#[derive(Debug)]
pub struct WebSocketStream {
    url: String,
    inner: TungsteniteStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketStream {
    /// Connects to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (inner, _response) = connect_async(url).await?;
        tracing::debug!(url = %url, "websocket stream connected");
        Ok(Self { url: url.to_string(), inner })
    }
}

#[async_trait]
impl StreamReader for WebSocketStream {
    async fn next_message(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Some)
                        .map_err(|e| TransportError::InvalidResponse(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(url = %self.url, frame = ?frame, "websocket stream closed by peer");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}
