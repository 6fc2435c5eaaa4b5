//! Integration and end-to-end tests for vigil
//!
//! - `tracker_tests`: head polling, Beat promotion and fallback
//! - `driver_cache_tests`: driver reads through the revision cache
//! - `remote_tests`: remote protocol handshake, forwarding and signing
//! - `reconnection_tests`: proxy behaviour when the host goes away
//! - `http_transport_tests`: reqwest transport and Beat WebSocket stream
//! - `server_tests`: the WebSocket listener end to end
//! - `config_tests`: layered configuration loading
//! - `mock_infrastructure`: reusable node, host and signer doubles
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod tracker_tests;




#[cfg(test)]
mod http_transport_tests;

#[cfg(test)]
mod server_tests;

#[cfg(test)]
mod config_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
