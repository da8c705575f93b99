//! kvm-mesh-peer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does a peer do? (for beginners)
//!
//! Every machine in the mesh runs the same peer binary.  On start-up it:
//!
//! 1. Joins the discovery multicast group and either finds the relay that is
//!    already running or, if nobody answers, elects itself and starts one.
//! 2. Connects to the relay over WebSocket and reports its monitors.
//! 3. Receives its transition zones and watches the cursor.  When the cursor
//!    crosses a zone it grabs the local keyboard and mouse and starts
//!    forwarding their events to the relay.
//! 4. When another peer hands focus to it, injects the relayed events through
//!    a virtual input device.
//! 5. Lets the user break out at any time by tapping Alt quickly several
//!    times (emergency release).

/// Application layer: agent state machine and cursor watch.
pub mod application;

/// Infrastructure layer: device adapters, network, configuration.
pub mod infrastructure;
