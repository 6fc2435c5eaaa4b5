//! Beat announcements delivered over `subscriptions/beat`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    types::Head,
    utils::{normalize_hex, parse_hex_bytes},
};

/// Per-block announcement with a touched-address Bloom filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beat {
    pub number: u64,
    pub id: String,
    #[serde(rename = "parentID")]
    pub parent_id: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txs_features: Option<u32>,
    /// Hex-encoded filter bit array.
    pub bloom: String,
    /// Number of hash rounds of the filter.
    pub k: u32,
    #[serde(default)]
    pub obsolete: bool,
}

impl Beat {
    /// Summarizes this beat as a [`Head`].
    #[must_use]
    pub fn head(&self) -> Head {
        Head {
            id: normalize_hex(&self.id),
            number: self.number,
            parent_id: normalize_hex(&self.parent_id),
            timestamp: self.timestamp,
            txs_features: self.txs_features,
        }
    }

    /// Decodes the Bloom filter, or `None` if the bit array is not valid hex.
    #[must_use]
    pub fn filter(&self) -> Option<BeatBloom> {
        parse_hex_bytes(&self.bloom).map(|bits| BeatBloom { k: self.k, bits })
    }
}

/// Decoded Beat filter: `k` hash rounds over `bits`.
#[derive(Clone, PartialEq, Eq)]
pub struct BeatBloom {
    pub k: u32,
    pub bits: Vec<u8>,
}

impl fmt::Debug for BeatBloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatBloom").field("k", &self.k).field("bits_len", &self.bits.len()).finish()
    }
}

/// Membership test over a [`BeatBloom`].
///
/// The hash construction is defined by the node, so the test is injected.
/// Implementations may report false positives but never false negatives.
pub trait BloomPredicate: fmt::Debug + Send + Sync {
    /// Returns `true` if the block might have touched `address` (lowercase hex).
    fn could_contain(&self, filter: &BeatBloom, address: &str) -> bool;
}

/// Predicate that treats every address as possibly touched.
///
/// Tied entries never survive a head advance under this predicate, which is
/// always correct.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeTouched;

impl BloomPredicate for AssumeTouched {
    fn could_contain(&self, _filter: &BeatBloom, _address: &str) -> bool {
        true
    }
}
