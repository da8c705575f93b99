//! File-system storage for the peer agent.

pub mod config;
