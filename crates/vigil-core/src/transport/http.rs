use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use url::Url;

use super::{
    websocket::WebSocketStream, Method, RequestOptions, StreamReader, Transport, TransportError,
};

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Maximum number of concurrent HTTP requests allowed
    pub concurrent_limit: usize,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Connection establishment timeout in seconds
    pub connect_timeout_seconds: u64,
    /// Permit acquisition timeout in milliseconds
    pub permit_timeout_ms: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 64,
            request_timeout_seconds: 30,
            connect_timeout_seconds: 5,
            permit_timeout_ms: 5_000,
        }
    }
}

/// reqwest-backed [`Transport`] bound to one node base URL.
///
/// Streams are opened over WebSocket at the same host, with `http`/`https`
/// mapped to `ws`/`wss`. Instances are cheap to share between drivers; the
/// connection pool is reused.
#[derive(Debug)]
pub struct HttpTransport {
    base: Url,
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the reqwest client fails to build.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_config(base_url, HttpTransportConfig::default())
    }

    /// Creates a transport for `base_url` with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the reqwest client fails to build.
    pub fn with_config(base_url: &str, config: HttpTransportConfig) -> Result<Self, TransportError> {
        let base = parse_base_url(base_url)?;
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.concurrent_limit)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .use_rustls_tls()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                TransportError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            base,
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit.max(1))),
            config,
        })
    }

    /// Returns the node base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolves `path` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if the joined URL is invalid.
    pub fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    /// Resolves `path` against the base URL with a WebSocket scheme.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if the scheme cannot be mapped.
    pub fn resolve_stream(&self, path: &str) -> Result<Url, TransportError> {
        let mut url = self.resolve(path)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(TransportError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|()| TransportError::InvalidUrl(format!("cannot map scheme for {url}")))?;
        Ok(url)
    }

    /// Sanitizes network errors to prevent information disclosure.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else {
            "network error".to_string()
        }
    }
}

/// Parses the node URL, making sure relative joins keep its path.
fn parse_base_url(base_url: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions<'_>,
    ) -> Result<Value, TransportError> {
        let url = self.resolve(path)?;

        let _permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                path = path,
                available_permits = self.concurrent_limit.available_permits(),
                "http transport semaphore acquisition timeout"
            );
            TransportError::Timeout
        })?
        .map_err(|_| TransportError::ConnectionFailed("transport closed".to_string()))?;

        let mut builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if !options.query.is_empty() {
            builder = builder.query(options.query);
        }
        if let Some(body) = options.body {
            builder = builder.json(body);
        }

        tracing::trace!(method = method.as_str(), path = path, "http request started");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::ConnectionFailed(Self::sanitize_network_error(&e))
            }
        })?;

        if let Some(validator) = options.validator {
            validator.validate(response.headers())?;
        }

        let status = response.status();
        if !status.is_success() {
            let raw_text = response.text().await.unwrap_or_default();
            let sanitized_text = if raw_text.len() > 256 {
                format!("{}... (truncated)", raw_text.chars().take(256).collect::<String>())
            } else {
                raw_text
            };
            tracing::trace!(status = status.as_u16(), path = path, "http request failed");
            return Err(TransportError::HttpError(status.as_u16(), sanitized_text.trim().to_string()));
        }

        let bytes = response.bytes().await?;
        tracing::trace!(path = path, bytes = bytes.len(), "http request completed");
        serde_json::from_slice(&bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn open_stream(&self, path: &str) -> Result<Box<dyn StreamReader>, TransportError> {
        let url = self.resolve_stream(path)?;
        let stream = WebSocketStream::connect(url.as_str()).await?;
        Ok(Box::new(stream))
    }
}
