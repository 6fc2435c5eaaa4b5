use thiserror::Error;

/// Errors raised by the node transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the node.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code).
    ///
    /// First field is the HTTP status code, second is the (truncated) body.
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// WebSocket handshake or stream failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Response body could not be parsed or was malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The node reported a different genesis block than the one this driver is bound to.
    #[error("Genesis mismatch: expected {expected}, got {actual}")]
    GenesisMismatch { expected: String, actual: String },

    /// The configured node URL cannot be used for the requested path.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and the request should be retried.
    ///
    /// Transient errors include:
    /// - Timeouts
    /// - Network and connection errors
    /// - WebSocket stream failures
    /// - HTTP 5xx server errors and HTTP 429 rate limiting
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout |
            Self::Network(_) |
            Self::ConnectionFailed(_) |
            Self::WebSocket(_) => true,
            Self::HttpError(status, _) => (500..=599).contains(status) || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` if this error is permanent and retrying won't help.
    ///
    /// Permanent errors include:
    /// - Genesis mismatches (talking to the wrong network)
    /// - Invalid responses (incompatible node)
    /// - Invalid URLs
    /// - HTTP 4xx client errors (except 429 rate limit)
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidResponse(_) | Self::GenesisMismatch { .. } | Self::InvalidUrl(_) => true,
            Self::HttpError(status, _) => (400..=499).contains(status) && *status != 429,
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(error.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUrl(error.to_string())
    }
}
