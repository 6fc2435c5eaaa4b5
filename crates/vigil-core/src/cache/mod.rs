//! Revision-aware response cache.
//!
//! # Entry Families
//!
//! | Family | Key | Valid until |
//! |--------|-----|-------------|
//! | pinned | `(kind, key, revision)` | capacity eviction |
//! | tied | `(kind, key)` stamped with a head id | the head advances, unless the entry's ties pass the Beat filter |
//!
//! Pinned entries hold data of a fixed revision, which never changes. Tied
//! entries hold data relative to the current head. On every accepted head
//! [`RevisionCache::handle_new_head`] re-stamps tied entries whose ties the
//! block's Bloom filter rules out, and evicts the rest.

pub mod config;
pub mod fetch_guard;
pub mod revision_cache;

pub use config::{CacheError, RevisionCacheConfig};
pub use fetch_guard::FetchGuard;
pub use revision_cache::{CacheStats, RevisionCache};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of cached node response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheKind {
    Block,
    Transaction,
    Receipt,
    Account,
    Code,
    Storage,
    Explain,
    EventLogs,
    TransferLogs,
}

impl CacheKind {
    pub const ALL: [Self; 9] = [
        Self::Block,
        Self::Transaction,
        Self::Receipt,
        Self::Account,
        Self::Code,
        Self::Storage,
        Self::Explain,
        Self::EventLogs,
        Self::TransferLogs,
    ];

    /// Returns a static string representation for logs and keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Transaction => "transaction",
            Self::Receipt => "receipt",
            Self::Account => "account",
            Self::Code => "code",
            Self::Storage => "storage",
            Self::Explain => "explain",
            Self::EventLogs => "event_logs",
            Self::TransferLogs => "transfer_logs",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
