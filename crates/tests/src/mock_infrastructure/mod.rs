//! Mock Infrastructure for Testing Vigil
//!
//! Reusable doubles for the node and the remote protocol, so drivers can be
//! exercised without a real node.
//!
//! ## Components
//!
//! - `MockTransport`: scripted node transport with an in-memory Beat stream
//! - `NodeMockBuilder`: wraps mockito to serve the node REST paths over HTTP
//! - `MockBeatServer`: real WebSocket server delivering Beats
//! - `MemoryConnector`: in-process driver host reachable through `Channel::pair`
//! - Test helpers for chain fixtures and a gated signer
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{chain_block, MockTransport};
//!
//! let node = MockTransport::with_chain(&chain_block(0, 0), &chain_block(10, 0));
//! node.respond("accounts/0xabc", json!({"balance": "0x1"}));
//! ```

pub mod beat_server;
pub mod test_helpers;

pub use beat_server::MockBeatServer;
pub use memory_host::MemoryConnector;
pub use mock_transport::{MockTransport, RecordedRequest};
pub use node_mock::NodeMockBuilder;
pub use test_helpers::*;
