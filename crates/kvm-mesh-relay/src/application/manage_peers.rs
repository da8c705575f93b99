//! PeerSessions: registry of live relay connections, keyed by peer id.
//!
//! The focus coordinator knows *who* is in the cluster; this registry knows
//! *how to reach them*.  Each entry holds the outbound handle of the peer's
//! current connection together with a connection generation number.
//!
//! # Connection generations (for beginners)
//!
//! A peer that loses its network for a moment may reconnect before the relay
//! has noticed the old connection is dead.  Both connections then claim the
//! same peer id.  Every accepted connection gets a fresh, increasing
//! generation number; the newest `Connect` wins the slot, and any later
//! message or close event carrying an older generation is ignored.  Without
//! this, the old connection's eventual close would evict the peer that just
//! reconnected.

use std::collections::HashMap;
use std::time::Instant;

use kvm_mesh_core::PeerId;

/// One live connection to a peer.
#[derive(Debug, Clone)]
pub struct PeerSession<T> {
    pub peer_id: PeerId,
    pub hostname: String,
    pub conn_gen: u64,
    pub connected_at: Instant,
    /// Transport-specific outbound handle (an mpsc sender in production).
    pub handle: T,
}

/// In-memory registry of all connected peers.
///
/// Owned exclusively by the relay's actor task, so it needs no lock.
#[derive(Debug)]
pub struct PeerSessions<T> {
    sessions: HashMap<PeerId, PeerSession<T>>,
}

impl<T> Default for PeerSessions<T> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<T> PeerSessions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `peer_id` to a new connection.
    ///
    /// Returns the superseded session, if any.  Dropping it drops its handle,
    /// which lets the old connection's writer wind down.
    pub fn register(
        &mut self,
        peer_id: PeerId,
        hostname: &str,
        conn_gen: u64,
        handle: T,
    ) -> Option<PeerSession<T>> {
        self.sessions.insert(
            peer_id,
            PeerSession {
                peer_id,
                hostname: hostname.to_string(),
                conn_gen,
                connected_at: Instant::now(),
                handle,
            },
        )
    }

    /// Returns `true` if `conn_gen` is the live connection for `peer_id`.
    pub fn is_current(&self, peer_id: PeerId, conn_gen: u64) -> bool {
        self.sessions
            .get(&peer_id)
            .is_some_and(|s| s.conn_gen == conn_gen)
    }

    /// Removes the session only if `conn_gen` is still the live connection.
    pub fn remove_if_current(&mut self, peer_id: PeerId, conn_gen: u64) -> Option<PeerSession<T>> {
        if self.is_current(peer_id, conn_gen) {
            self.sessions.remove(&peer_id)
        } else {
            None
        }
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerSession<T>> {
        self.sessions.get(&peer_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PeerSession<T>> + '_ {
        self.sessions.drain().map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_registry_starts_empty() {
        let sessions: PeerSessions<()> = PeerSessions::new();
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_register_replaces_older_generation() {
        let mut sessions = PeerSessions::new();
        let id = Uuid::new_v4();
        assert!(sessions.register(id, "desk", 1, "old").is_none());

        let replaced = sessions.register(id, "desk-2", 2, "new").unwrap();

        assert_eq!(replaced.handle, "old");
        assert_eq!(replaced.hostname, "desk");
        assert!(replaced.connected_at <= sessions.get(id).unwrap().connected_at);
        assert_eq!(sessions.get(id).unwrap().hostname, "desk-2");
        assert_eq!(sessions.get(id).unwrap().handle, "new");
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_stale_generation_cannot_remove_newer_session() {
        let mut sessions = PeerSessions::new();
        let id = Uuid::new_v4();
        sessions.register(id, "desk", 1, ());
        sessions.register(id, "desk", 2, ());

        assert!(sessions.remove_if_current(id, 1).is_none());
        assert!(sessions.is_current(id, 2));
        assert!(sessions.remove_if_current(id, 2).is_some());
        assert!(sessions.get(id).is_none());
    }

    #[test]
    fn test_is_current_is_false_for_unknown_peer() {
        let sessions: PeerSessions<()> = PeerSessions::new();
        assert!(!sessions.is_current(Uuid::new_v4(), 0));
    }
}
