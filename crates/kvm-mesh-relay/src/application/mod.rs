//! Application layer use cases for the relay.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `kvm-mesh-core`) and the infrastructure (sockets, tasks).
//! Use cases here orchestrate domain objects and contain no network I/O.
//!
//! # Sub-modules
//!
//! - **`route_focus`** – The focus-ownership state machine.  Decides who
//!   receives input, accepts or rejects focus handoffs and redistributes
//!   transition zones on membership change.
//!
//! - **`manage_peers`** – Registry of live connections, including the
//!   generation counter that lets a reconnecting peer win over its stale
//!   predecessor.

pub mod manage_peers;
pub mod route_focus;
