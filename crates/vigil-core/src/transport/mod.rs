//! Node transport capability.
//!
//! The driver talks to the node only through [`Transport`]: JSON requests over
//! HTTP and a text-message stream for the Beat subscription. [`HttpTransport`]
//! is the production implementation; tests inject scripted transports.

pub mod errors;
pub mod http;
pub mod websocket;

pub use errors::TransportError;
pub use http::{HttpTransport, HttpTransportConfig};
pub use reqwest::header::HeaderMap;
pub use websocket::{StreamFailureTracker, WebSocketStream};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::utils::normalize_hex;

/// Response header carrying the node's genesis block id.
pub const GENESIS_HEADER: &str = "x-genesis-id";

/// HTTP method of a node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Hook run against every response's headers before the body is decoded.
pub trait ResponseValidator: fmt::Debug + Send + Sync {
    /// # Errors
    ///
    /// Returns a [`TransportError`] that aborts the request.
    fn validate(&self, headers: &HeaderMap) -> Result<(), TransportError>;
}

/// Asserts that the node still reports the genesis block the driver was bound to.
#[derive(Debug, Clone)]
pub struct GenesisValidator {
    expected: String,
}

impl GenesisValidator {
    #[must_use]
    pub fn new(genesis_id: &str) -> Self {
        Self { expected: normalize_hex(genesis_id) }
    }
}

impl ResponseValidator for GenesisValidator {
    fn validate(&self, headers: &HeaderMap) -> Result<(), TransportError> {
        let Some(value) = headers.get(GENESIS_HEADER) else { return Ok(()) };
        let actual = normalize_hex(value.to_str().unwrap_or_default());
        if actual == self.expected {
            Ok(())
        } else {
            Err(TransportError::GenesisMismatch { expected: self.expected.clone(), actual })
        }
    }
}

/// Per-request options.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestOptions<'a> {
    pub query: &'a [(&'a str, String)],
    pub body: Option<&'a Value>,
    pub validator: Option<&'a dyn ResponseValidator>,
}

/// Request/stream capability consumed by the driver.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Sends a request to `path` (relative to the node base URL) and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] for network failures, non-success statuses,
    /// validator rejections and undecodable bodies.
    async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions<'_>,
    ) -> Result<Value, TransportError>;

    /// Opens a text-message stream at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the stream cannot be established.
    async fn open_stream(&self, path: &str) -> Result<Box<dyn StreamReader>, TransportError>;
}

/// Reader yielding one text message at a time.
#[async_trait]
pub trait StreamReader: fmt::Debug + Send {
    /// Returns the next message, or `None` once the stream is closed.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the stream fails.
    async fn next_message(&mut self) -> Result<Option<String>, TransportError>;
}
