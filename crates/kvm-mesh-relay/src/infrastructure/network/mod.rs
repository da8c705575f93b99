//! Network infrastructure for the relay.
//!
//! # Sub-modules
//!
//! - **`server`** – Binds the TCP listener, upgrades each connection to a
//!   WebSocket, and runs one reader task and one writer task per peer.  All
//!   decoded messages are funnelled into a single actor task that owns the
//!   focus coordinator.

pub mod server;
