//! WebSocket front end of the driver host.
//!
//! The binary wires a [`LocalDriver`](vigil_core::driver::LocalDriver) to a
//! [`DriverHost`](vigil_core::remote::DriverHost); this library holds the
//! pieces that are worth testing without a process around them.

pub mod listener;

pub use listener::{serve_connections, SharedDriverAcceptor};
