//! Data types shared by the driver, the cache and the remote protocol.
//!
//! Node payloads that only the query-builder layer interprets (transactions,
//! receipts, accounts, VM outputs, logs) stay as [`serde_json::Value`]. Only
//! the fields this layer reasons about are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::utils::hex::normalize_hex;

/// Compact summary of the best-known block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Head {
    /// Block id (lowercase hex).
    pub id: String,
    /// Block number.
    pub number: u64,
    /// Parent block id.
    #[serde(rename = "parentID")]
    pub parent_id: String,
    /// Block timestamp in unix seconds.
    pub timestamp: u64,
    /// Extra feature bits announced by the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txs_features: Option<u32>,
}

impl Head {
    /// Returns `true` if `candidate` should replace `self` as the current head.
    ///
    /// A candidate is accepted when its id differs and its number is not lower.
    #[must_use]
    pub fn is_superseded_by(&self, candidate: &Self) -> bool {
        candidate.id != self.id && candidate.number >= self.number
    }
}

/// A block as returned by `blocks/{revision}`.
///
/// Header fields used for head tracking are typed, every other field of the
/// node's JSON object is preserved in `rest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub number: u64,
    #[serde(rename = "parentID")]
    pub parent_id: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txs_features: Option<u32>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Block {
    /// Summarizes this block as a [`Head`].
    #[must_use]
    pub fn to_head(&self) -> Head {
        Head {
            id: normalize_hex(&self.id),
            number: self.number,
            parent_id: normalize_hex(&self.parent_id),
            timestamp: self.timestamp,
            txs_features: self.txs_features,
        }
    }
}

/// A pinned point of chain state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Revision {
    Number(u64),
    Named(String),
}

impl Revision {
    /// The literal best revision.
    #[must_use]
    pub fn best() -> Self {
        Self::Named("best".to_string())
    }

    /// A block id revision, normalized to lowercase.
    #[must_use]
    pub fn id(id: &str) -> Self {
        Self::Named(normalize_hex(id))
    }

    /// Returns `true` for the literal `best`.
    #[must_use]
    pub fn is_best(&self) -> bool {
        matches!(self, Self::Named(name) if name.eq_ignore_ascii_case("best"))
    }

    /// Returns the block id if this revision names one.
    #[must_use]
    pub fn as_id(&self) -> Option<String> {
        match self {
            Self::Named(name) if name.starts_with("0x") || name.starts_with("0X") => {
                Some(normalize_hex(name))
            }
            _ => None,
        }
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::best()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Named(name) => f.write_str(&normalize_hex(name)),
        }
    }
}

impl From<u64> for Revision {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<&str> for Revision {
    fn from(name: &str) -> Self {
        Self::Named(normalize_hex(name))
    }
}

/// One clause of a simulated or signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub to: Option<String>,
    pub value: String,
    pub data: String,
}

/// Arguments of `accounts/*` (simulated execution).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainArg {
    pub clauses: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
}

/// Range unit of a log filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeUnit {
    Block,
    Time,
}

/// Inclusive range of a log filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRange {
    pub unit: RangeUnit,
    pub from: u64,
    pub to: u64,
}

/// Paging of a log filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub offset: u64,
    pub limit: u64,
}

/// Result ordering of a log filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOrder {
    #[default]
    Asc,
    Desc,
}

/// Event log criteria; every field narrows the match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic0: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic4: Option<String>,
}

/// Transfer log criteria.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// Body of `logs/event` and `logs/transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterArg<C> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<FilterRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FilterOptions>,
    pub criteria_set: Vec<C>,
    #[serde(default)]
    pub order: FilterOrder,
}

pub type EventFilterArg = FilterArg<EventCriteria>;
pub type TransferFilterArg = FilterArg<TransferCriteria>;

/// Clause of a transaction submitted for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxClause {
    pub to: Option<String>,
    pub value: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<Value>,
}

/// Fee delegation service used while signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegator {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTxOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegator: Option<Delegator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    pub txid: String,
    pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// Certificate submitted for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertMessage {
    pub purpose: String,
    pub payload: CertPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignCertOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertAnnex {
    pub domain: String,
    pub timestamp: u64,
    pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertResponse {
    pub annex: CertAnnex,
    pub signature: String,
}

/// Handshake reply of the remote protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connected {
    pub genesis: Block,
    pub head: Head,
}
