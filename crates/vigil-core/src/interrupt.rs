//! Cooperative cancellation for driver-owned operations.
//!
//! An [`InterruptToken`] is shared by every network operation a driver issues.
//! [`InterruptToken::wrap`] races an operation against the token; once
//! [`InterruptToken::interrupt`] fires, every wrapped operation that has not
//! settled resolves with [`Interrupted`] and operations wrapped later are never
//! polled at all.
//!
//! # Example
//!
//! ```no_run
//! use vigil_core::interrupt::InterruptToken;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let token = InterruptToken::new();
//! let worker = token.clone();
//!
//! let task = tokio::spawn(async move { worker.sleep(Duration::from_secs(60)).await });
//!
//! assert!(token.interrupt());
//! assert!(!token.interrupt());
//! assert!(task.await.unwrap().is_err());
//! # }
//! ```

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Distinguished condition returned by operations rejected by an interrupt.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("interrupted")]
pub struct Interrupted;

/// One-shot, clonable cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl InterruptToken {
    /// Creates a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that fires together with `self` but can also be
    /// interrupted on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token(), fired: Arc::new(AtomicBool::new(false)) }
    }

    /// Fires the token.
    ///
    /// Returns `true` for the call that actually fired it and `false` for every
    /// later call, which has no further effect.
    pub fn interrupt(&self) -> bool {
        if self.fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }
        self.token.cancel();
        debug!("interrupt token fired");
        true
    }

    /// Returns `true` once the token (or a parent) has fired.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the token fires.
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }

    /// Runs `op` unless the token fires first.
    ///
    /// When the token has already fired `op` is dropped without being polled.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the token fires before `op` completes.
    pub async fn wrap<F>(&self, op: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if self.is_interrupted() {
            return Err(Interrupted);
        }

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Interrupted),
            output = op => Ok(output),
        }
    }

    /// Sleeps for `duration` unless the token fires first.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the token fires during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.wrap(tokio::time::sleep(duration)).await
    }
}
