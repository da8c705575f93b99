//! Infrastructure layer for the peer agent.
//!
//! Contains OS-facing adapters and network I/O.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `kvm_mesh_core`, but the domain never imports it.
//!
//! # Sub-modules
//!
//! - **`input_device`**: the keyboard/mouse capability trait, the blocking
//!   read pump, and a recording mock.
//!
//! - **`display`**: cursor position and monitor enumeration behind the
//!   `DisplayServer` trait, with a mock for hosts without a backend.
//!
//! - **`network`**: multicast discovery/election and the relay WebSocket link.
//!
//! - **`storage`**: TOML configuration loading and validation.

pub mod display;
pub mod input_device;
pub mod network;
pub mod storage;
