use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CacheKind;

/// Errors raised while building a revision cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Per-kind capacities of the revision cache.
///
/// Each kind keeps two LRUs of this size, one per entry family. A capacity of
/// zero disables caching for that kind without affecting correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionCacheConfig {
    pub block_capacity: usize,
    pub transaction_capacity: usize,
    pub receipt_capacity: usize,
    pub account_capacity: usize,
    pub code_capacity: usize,
    pub storage_capacity: usize,
    pub explain_capacity: usize,
    pub log_capacity: usize,
}

impl Default for RevisionCacheConfig {
    fn default() -> Self {
        Self {
            block_capacity: 256,
            transaction_capacity: 1024,
            receipt_capacity: 1024,
            account_capacity: 1024,
            code_capacity: 256,
            storage_capacity: 1024,
            explain_capacity: 1024,
            log_capacity: 256,
        }
    }
}

impl RevisionCacheConfig {
    /// A configuration that stores nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            block_capacity: 0,
            transaction_capacity: 0,
            receipt_capacity: 0,
            account_capacity: 0,
            code_capacity: 0,
            storage_capacity: 0,
            explain_capacity: 0,
            log_capacity: 0,
        }
    }

    /// Returns the capacity configured for `kind`.
    #[must_use]
    pub fn capacity(&self, kind: CacheKind) -> usize {
        match kind {
            CacheKind::Block => self.block_capacity,
            CacheKind::Transaction => self.transaction_capacity,
            CacheKind::Receipt => self.receipt_capacity,
            CacheKind::Account => self.account_capacity,
            CacheKind::Code => self.code_capacity,
            CacheKind::Storage => self.storage_capacity,
            CacheKind::Explain => self.explain_capacity,
            CacheKind::EventLogs | CacheKind::TransferLogs => self.log_capacity,
        }
    }

    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if a capacity is unreasonably large.
    pub fn validate(&self) -> Result<(), CacheError> {
        const MAX_CAPACITY: usize = 1 << 20;
        for kind in CacheKind::ALL {
            let capacity = self.capacity(kind);
            if capacity > MAX_CAPACITY {
                return Err(CacheError::InvalidConfig(format!(
                    "{} capacity {capacity} exceeds {MAX_CAPACITY}",
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }
}
