//! Test Helper Functions and Utilities
//!
//! Chain fixtures, tracker timings and a signer double.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::Notify;
use vigil_core::{
    chain::{Beat, TrackerConfig},
    driver::{DriverError, LocalDriver, PreparedNotifier, Signer},
    transport::Transport,
    types::{
        CertAnnex, CertMessage, CertResponse, SignCertOptions, SignTxOptions, TxClause, TxResponse,
    },
};

use super::MockTransport;

/// Signer address owned by [`GatedSigner`].
pub const SIGNER_ADDRESS: &str = "0x7567d83b7b8d80addcb281a71d54fc7b3364ffed";

/// Genesis id used by the fixtures.
pub const GENESIS_ID: &str = "0x00000000851caf3cfdb6e899cf5958bfb1ac3413d346d43539627e6be7ec1b4a";

#[must_use]
pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Canonical 32-byte block id of `number`.
#[must_use]
pub fn block_id(number: u64) -> String {
    if number == 0 { GENESIS_ID.to_string() } else { format!("0x{number:064x}") }
}

/// Block payload as the node returns it.
#[must_use]
pub fn create_test_block(id: &str, number: u64, parent_id: &str, timestamp: u64) -> Value {
    json!({
        "id": id,
        "number": number,
        "parentID": parent_id,
        "timestamp": timestamp,
        "gasLimit": 40_000_000,
        "gasUsed": 0,
        "beneficiary": "0x0000000000000000000000000000000000000000",
        "transactions": []
    })
}

/// Block `number` on the fixture chain, stamped `timestamp`.
#[must_use]
pub fn chain_block(number: u64, timestamp: u64) -> Value {
    create_test_block(&block_id(number), number, &block_id(number.saturating_sub(1)), timestamp)
}

/// Beat announcing block `number` of the fixture chain.
#[must_use]
pub fn create_test_beat(number: u64, timestamp: u64) -> Beat {
    Beat {
        number,
        id: block_id(number),
        parent_id: block_id(number.saturating_sub(1)),
        timestamp,
        txs_features: None,
        bloom: "0x00".into(),
        k: 1,
        obsolete: false,
    }
}

/// Tracker that effectively never polls on its own.
#[must_use]
pub fn quiet_tracker() -> TrackerConfig {
    TrackerConfig { poll_interval_ms: 3_600_000, ..Default::default() }
}

/// Tracker polling every 10 ms and promoting after `streak` fresh heads.
#[must_use]
pub fn fast_tracker(streak: u32) -> TrackerConfig {
    TrackerConfig {
        poll_interval_ms: 10,
        beat_promotion_streak: streak,
        stream_fallback_delay_ms: 10,
        ..Default::default()
    }
}

/// Mock node at head `number` of the fixture chain.
#[must_use]
pub fn node_at(number: u64) -> Arc<MockTransport> {
    MockTransport::with_chain(&chain_block(0, 0), &chain_block(number, 0))
}

/// Connects a driver to `node` with a quiet tracker.
///
/// # Panics
///
/// Panics if the driver cannot connect.
pub async fn connect_quiet(node: &Arc<MockTransport>) -> LocalDriver {
    LocalDriver::builder()
        .tracker_config(quiet_tracker())
        .connect(Arc::clone(node) as Arc<dyn Transport>)
        .await
        .expect("driver connects to mock node")
}

/// Awaits `future`, failing the test after five seconds.
///
/// # Panics
///
/// Panics if `future` does not complete in time.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future).await.expect("operation timed out")
}

/// Signer that reports the prepared phase at once and finishes on release.
#[derive(Debug, Default)]
pub struct GatedSigner {
    release: Notify,
    declined: bool,
}

impl GatedSigner {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A signer that reports prepared, then declines.
    #[must_use]
    pub fn declining() -> Arc<Self> {
        Arc::new(Self { release: Notify::new(), declined: true })
    }

    /// Lets one pending request finish.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Signer for GatedSigner {
    async fn sign_tx(
        &self,
        message: Vec<TxClause>,
        options: SignTxOptions,
        mut prepared: PreparedNotifier,
    ) -> Result<TxResponse, DriverError> {
        prepared.notify();
        self.release.notified().await;
        if self.declined {
            return Err(DriverError::Rejected("user declined".into()));
        }
        let signer = options.signer.unwrap_or_else(|| SIGNER_ADDRESS.to_string());
        Ok(TxResponse { txid: format!("0x{:064x}", message.len()), signer })
    }

    async fn sign_cert(
        &self,
        message: CertMessage,
        options: SignCertOptions,
        mut prepared: PreparedNotifier,
    ) -> Result<CertResponse, DriverError> {
        prepared.notify();
        self.release.notified().await;
        if self.declined {
            return Err(DriverError::Rejected("user declined".into()));
        }
        Ok(CertResponse {
            annex: CertAnnex {
                domain: message.purpose,
                timestamp: now(),
                signer: options.signer.unwrap_or_else(|| SIGNER_ADDRESS.to_string()),
            },
            signature: "0x".to_string() + &"ab".repeat(65),
        })
    }

    async fn is_address_owned(&self, address: &str) -> Result<bool, DriverError> {
        Ok(address.eq_ignore_ascii_case(SIGNER_ADDRESS))
    }
}
