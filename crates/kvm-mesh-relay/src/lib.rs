//! kvm-mesh-relay library entry point.
//!
//! The relay is not a separate binary: whichever peer wins the election
//! embeds it.  Integration tests in `tests/` drive it the same way.

pub mod application;
pub mod infrastructure;

pub use application::route_focus::{FocusCoordinator, Outbound};
pub use infrastructure::network::server::{RelayConfig, RelayError, RelayServer};
