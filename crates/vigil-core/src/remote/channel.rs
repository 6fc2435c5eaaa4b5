//! Bidirectional text channels carrying protocol frames.

use async_trait::async_trait;
use futures::{channel::mpsc, future, Sink, SinkExt, Stream, StreamExt};
use std::{fmt, pin::Pin};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// One persistent text channel.
pub struct Channel {
    sink: FrameSink,
    stream: FrameStream,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

impl Channel {
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }

    /// Two connected in-memory ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded::<String>();
        let (b_tx, b_rx) = mpsc::unbounded::<String>();
        (Self::from_mpsc(a_tx, b_rx), Self::from_mpsc(b_tx, a_rx))
    }

    fn from_mpsc(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self::new(
            Box::pin(tx.sink_map_err(|_| ChannelError::Closed)),
            Box::pin(rx.map(Ok::<_, ChannelError>)),
        )
    }

    /// Wraps an established WebSocket.
    ///
    /// Binary messages are read as UTF-8 text; control frames are skipped.
    #[must_use]
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let sink = sink.with(|text: String| {
            future::ready(Ok::<_, ChannelError>(Message::Text(text.into())))
        });
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::from(e))),
            })
        });
        Self::new(Box::pin(sink), Box::pin(stream))
    }

    #[must_use]
    pub fn split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

/// Opens client channels to a driver host.
#[async_trait]
pub trait Connector: fmt::Debug + Send + Sync {
    async fn connect(&self) -> Result<Channel, ChannelError>;
}

/// Connects to a host over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Channel, ChannelError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        Ok(Channel::from_websocket(ws))
    }
}
