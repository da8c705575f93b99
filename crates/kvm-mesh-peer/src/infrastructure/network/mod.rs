//! Network infrastructure for the peer agent.
//!
//! - **`discovery`**: UDP multicast discovery that finds the relay or elects
//!   this peer to run it.
//! - **`connection`**: the WebSocket link to the relay once one is known.

pub mod connection;
pub mod discovery;
