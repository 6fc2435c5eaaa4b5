//! Two-phase signing results.
//!
//! A signing request first becomes *prepared* (the signer accepted it, e.g. a
//! wallet window opened) and later *finishes* with the signed response or an
//! error. [`SigningSession`] exposes both phases to the caller; the
//! [`Signer`] reports the first one through a [`PreparedNotifier`].

use async_trait::async_trait;
use std::fmt;
use tokio::sync::oneshot;

use super::errors::DriverError;
use crate::types::{CertMessage, CertResponse, SignCertOptions, SignTxOptions, TxClause, TxResponse};

/// External signing capability.
#[async_trait]
pub trait Signer: fmt::Debug + Send + Sync {
    async fn sign_tx(
        &self,
        message: Vec<TxClause>,
        options: SignTxOptions,
        prepared: PreparedNotifier,
    ) -> Result<TxResponse, DriverError>;

    async fn sign_cert(
        &self,
        message: CertMessage,
        options: SignCertOptions,
        prepared: PreparedNotifier,
    ) -> Result<CertResponse, DriverError>;

    async fn is_address_owned(&self, address: &str) -> Result<bool, DriverError>;
}

/// Fires the prepared phase of one signing request.
///
/// Only the first call has an effect. Dropping the notifier unfired tells the
/// session the request finished without a prepared phase.
#[derive(Debug)]
pub struct PreparedNotifier(Option<oneshot::Sender<()>>);

impl PreparedNotifier {
    pub fn notify(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Producer side of a [`SigningSession`].
#[derive(Debug)]
pub struct SigningHandle<T> {
    pub prepared: PreparedNotifier,
    pub result: oneshot::Sender<Result<T, DriverError>>,
}

impl<T> SigningHandle<T> {
    /// Settles the session; a session whose caller went away is ignored.
    pub fn finish(self, outcome: Result<T, DriverError>) {
        let _ = self.result.send(outcome);
    }
}

/// Caller side of one signing request.
pub struct SigningSession<T> {
    prepared: Option<oneshot::Receiver<()>>,
    was_prepared: bool,
    result: oneshot::Receiver<Result<T, DriverError>>,
}

impl<T> fmt::Debug for SigningSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSession")
            .field("was_prepared", &self.was_prepared)
            .field("prepared_pending", &self.prepared.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> SigningSession<T> {
    /// Creates a connected handle and session.
    #[must_use]
    pub fn channel() -> (SigningHandle<T>, Self) {
        let (prepared_tx, prepared_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();
        (
            SigningHandle { prepared: PreparedNotifier(Some(prepared_tx)), result: result_tx },
            Self { prepared: Some(prepared_rx), was_prepared: false, result: result_rx },
        )
    }

    /// Waits for the prepared phase.
    ///
    /// Returns `true` once the signer reported it, `false` if the request
    /// settled without one. Calling it again returns the same answer.
    pub async fn prepared(&mut self) -> bool {
        if let Some(rx) = self.prepared.take() {
            self.was_prepared = rx.await.is_ok();
        }
        self.was_prepared
    }

    /// Waits for the final outcome.
    ///
    /// # Errors
    ///
    /// Returns the signer's error, or [`DriverError::Closed`] if the producer
    /// went away without settling.
    pub async fn finish(self) -> Result<T, DriverError> {
        self.result.await.unwrap_or(Err(DriverError::Closed))
    }
}
