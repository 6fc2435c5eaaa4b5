//! Remote driver protocol.
//!
//! A [`DriverHost`] exposes a [`Driver`](crate::driver::Driver) over a
//! persistent text [`Channel`]; a [`RemoteDriver`] on the other end implements
//! the same trait by forwarding calls, so the query-builder layer cannot tell
//! the two apart.

pub mod channel;
pub mod host;
pub mod proxy;
pub mod wire;

pub use channel::{Channel, ChannelError, Connector, WebSocketConnector};
pub use host::{Acceptor, DriverHost, ALLOWED_METHODS};
pub use proxy::RemoteDriver;
pub use wire::{ErrorBody, Frame, Notification, Request, Response, WireError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proxy reconnection timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Delay before reconnecting after the channel is lost.
    pub reconnect_delay_seconds: u64,
    /// Delay before reissuing `pollHead` after it failed.
    pub poll_retry_delay_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { reconnect_delay_seconds: 10, poll_retry_delay_seconds: 5 }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    #[must_use]
    pub fn poll_retry_delay(&self) -> Duration {
        Duration::from_secs(self.poll_retry_delay_seconds)
    }
}
