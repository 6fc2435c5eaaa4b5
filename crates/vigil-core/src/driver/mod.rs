//! The chain access interface.
//!
//! [`Driver`] is what the query-builder layer talks to. [`LocalDriver`] serves
//! it from a node over HTTP with head tracking and caching;
//! [`RemoteDriver`](crate::remote::RemoteDriver) forwards it over a
//! persistent channel to a [`DriverHost`](crate::remote::DriverHost).

pub mod errors;
pub mod local;
pub mod signing;

pub use errors::DriverError;
pub use local::{LocalDriver, LocalDriverBuilder};
pub use signing::{PreparedNotifier, Signer, SigningHandle, SigningSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};

use crate::types::{
    Block, CertMessage, CertResponse, EventFilterArg, ExplainArg, Head, Revision,
    SignCertOptions, SignTxOptions, TransferFilterArg, TxClause, TxResponse,
};

/// Chain access operations.
///
/// Node payloads are returned as JSON; `Ok(None)` means the node answered
/// `null` (unknown block, transaction or receipt).
#[async_trait]
pub trait Driver: fmt::Debug + Send + Sync {
    /// The genesis block this driver is bound to.
    fn genesis(&self) -> &Block;

    /// The current head.
    fn head(&self) -> Arc<Head>;

    /// Resolves with the next accepted head.
    async fn poll_head(&self) -> Result<Arc<Head>, DriverError>;

    async fn get_block(&self, revision: Revision) -> Result<Option<Value>, DriverError>;

    async fn get_transaction(
        &self,
        id: &str,
        allow_pending: bool,
    ) -> Result<Option<Value>, DriverError>;

    async fn get_receipt(&self, id: &str) -> Result<Option<Value>, DriverError>;

    async fn get_account(&self, address: &str, revision: Revision) -> Result<Value, DriverError>;

    async fn get_code(&self, address: &str, revision: Revision) -> Result<Value, DriverError>;

    async fn get_storage(
        &self,
        address: &str,
        key: &str,
        revision: Revision,
    ) -> Result<Value, DriverError>;

    /// Simulates `arg`. `cache_ties` lists the addresses whose change
    /// invalidates a cached result at the head.
    async fn explain(
        &self,
        arg: &ExplainArg,
        revision: Revision,
        cache_ties: Option<&[String]>,
    ) -> Result<Value, DriverError>;

    async fn filter_event_logs(&self, arg: &EventFilterArg) -> Result<Value, DriverError>;

    async fn filter_transfer_logs(&self, arg: &TransferFilterArg) -> Result<Value, DriverError>;

    async fn sign_tx(
        &self,
        message: Vec<TxClause>,
        options: SignTxOptions,
    ) -> Result<SigningSession<TxResponse>, DriverError>;

    async fn sign_cert(
        &self,
        message: CertMessage,
        options: SignCertOptions,
    ) -> Result<SigningSession<CertResponse>, DriverError>;

    async fn is_address_owned(&self, address: &str) -> Result<bool, DriverError>;

    /// Interrupts every pending operation and stops background work.
    /// Idempotent.
    fn close(&self);
}

/// Local driver behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Blocks at least this far below the head are treated as immutable.
    pub irreversible_depth: u64,
    /// Retries of a cache-miss fetch after a transient transport error.
    pub fetch_retries: u32,
    /// First retry delay; doubles on each attempt.
    pub retry_base_delay_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { irreversible_depth: 12, fetch_retries: 2, retry_base_delay_ms: 200 }
    }
}

impl DriverConfig {
    /// Delay before retry `attempt` (1-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.retry_base_delay_ms.saturating_mul(1 << attempt.saturating_sub(1).min(16)),
        )
    }

    /// Returns `true` if block `number` can no longer be reorganized away.
    #[must_use]
    pub fn is_irreversible(&self, number: u64, head: &Head) -> bool {
        number.saturating_add(self.irreversible_depth) <= head.number
    }
}
