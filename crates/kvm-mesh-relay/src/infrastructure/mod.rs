//! Infrastructure layer for the relay.
//!
//! Contains the WebSocket listener, per-connection reader/writer tasks and
//! the actor task that owns the [`crate::FocusCoordinator`].
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `kvm_mesh_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
