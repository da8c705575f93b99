//! Application layer use cases for the peer agent.
//!
//! - **`handle_focus`**: the agent's focus state machine.  It decides when
//!   local input is forwarded, when relay input is injected, and reacts to
//!   emergency release.
//!
//! - **`watch_zones`**: samples the cursor on a fixed interval and reports
//!   transition-zone crossings to the agent.

pub mod handle_focus;
pub mod watch_zones;
