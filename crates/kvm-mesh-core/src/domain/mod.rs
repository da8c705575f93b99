//! Domain entities for KVM-Mesh.
//!
//! This module contains pure logic with no infrastructure dependencies: no
//! sockets, no clocks, no OS input APIs.  Everything here can be compiled and
//! tested on any platform.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is the **domain**.  Outer layers (the relay's WebSocket server, the
//! peer's device adapters) depend on the domain, but the domain never depends
//! on them.  That is why the topology engine and the release detector take
//! plain values in and return plain values out.

/// Relay election state machine driven by the discovery service.
pub mod election;

/// Integer screen-space primitives.
pub mod geometry;

/// Emergency-release sliding-window detector.
pub mod release;

/// Peer arrangement and transition-zone computation.
pub mod topology;
