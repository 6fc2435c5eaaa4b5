//! # Vigil Core
//!
//! Chain-state access layer for a VeChain-style node reachable over HTTP and a
//! Beat push channel.
//!
//! This crate provides the foundational components for:
//!
//! - **[`interrupt`]**: Cooperative cancellation shared by every pending network operation of a
//!   driver instance.
//!
//! - **[`cache`]**: Revision-aware cache with pinned (revision-keyed) and tied (head-relative)
//!   entry families, single-flight fetch collapse and Bloom-driven invalidation.
//!
//! - **[`chain`]**: Head state, Beat decoding and the head tracker loop that alternates between
//!   polling and the push channel.
//!
//! - **[`driver`]**: The [`Driver`](driver::Driver) interface and the local implementation
//!   composing transport, tracker and cache.
//!
//! - **[`remote`]**: Wire framing, the server-side [`DriverHost`](remote::DriverHost) and the
//!   [`RemoteDriver`](remote::RemoteDriver) proxy.
//!
//! - **[`transport`]**: The injected HTTP / stream capability with reqwest and
//!   tokio-tungstenite implementations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         LocalDriver                          │
//! │  ┌──────────────────┐  ┌───────────────┐  ┌───────────────┐  │
//! │  │  RevisionCache   │◄─┤  HeadTracker  ├─►│   HeadState   │  │
//! │  │ pinned │ tied    │  │ poll │ beats  │  │ArcSwap+bcast  │  │
//! │  └────────┬─────────┘  └───────┬───────┘  └───────────────┘  │
//! │           │ miss               │                             │
//! │  ┌────────▼────────────────────▼──────┐   ┌───────────────┐  │
//! │  │             Transport              │   │ InterruptToken│  │
//! │  │   HttpTransport │ BeatStream (ws)  │   └───────────────┘  │
//! │  └────────────────────────────────────┘                      │
//! └──────────────────────────────────────────────────────────────┘
//!            ▲                                     ▲
//!            │ Driver trait                        │ Driver trait
//!     ┌──────┴──────┐    ws frames     ┌───────────┴─────┐
//!     │ DriverHost  │◄────────────────►│   RemoteDriver  │
//!     └─────────────┘                  └─────────────────┘
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod driver;
pub mod interrupt;
pub mod remote;
pub mod transport;
pub mod types;
pub mod utils;
