use thiserror::Error;

use crate::{interrupt::Interrupted, transport::TransportError};

/// Errors surfaced by [`Driver`](super::Driver) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The driver was closed before the operation settled.
    #[error("driver interrupted")]
    Interrupted,

    /// The remote channel carrying the request was lost.
    #[error("channel closed")]
    Closed,

    /// The node transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The node answered with a payload this layer cannot interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not available on this driver.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The signer declined the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Error reported by a remote driver host.
    #[error("{message}")]
    Remote { kind: String, message: String },
}

impl From<Interrupted> for DriverError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl DriverError {
    /// Returns `true` if the driver was closed, as opposed to the request failing.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Transport(e) => e.is_transient(),
            Self::Remote { kind, .. } => kind == "transient",
            _ => false,
        }
    }

    /// Stable category name carried over the remote protocol.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Interrupted => "interrupted",
            Self::Closed => "closed",
            Self::Transport(TransportError::GenesisMismatch { .. }) => "genesis_mismatch",
            Self::Transport(e) if e.is_transient() => "transient",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unsupported(_) => "unsupported",
            Self::Rejected(_) => "rejected",
            Self::Remote { kind, .. } => kind,
        }
    }

    /// Rebuilds an error received from a remote host.
    #[must_use]
    pub fn from_remote(kind: &str, message: String) -> Self {
        match kind {
            "interrupted" => Self::Interrupted,
            "closed" => Self::Closed,
            "invalid_response" => Self::InvalidResponse(message),
            "invalid_argument" => Self::InvalidArgument(message),
            "unsupported" => Self::Unsupported(message),
            "rejected" => Self::Rejected(message),
            "genesis_mismatch" => parse_genesis_mismatch(&message)
                .unwrap_or(Self::Remote { kind: kind.to_string(), message }),
            _ => Self::Remote { kind: kind.to_string(), message },
        }
    }
}

fn parse_genesis_mismatch(message: &str) -> Option<DriverError> {
    let (expected, actual) =
        message.strip_prefix("Genesis mismatch: expected ")?.split_once(", got ")?;
    Some(DriverError::Transport(TransportError::GenesisMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }))
}
