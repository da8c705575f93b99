//! Relay election state machine.
//!
//! Every peer starts in [`ElectionState::Discovering`] and multicasts a
//! `Query` once per tick.  If a compatible `ServerAnnounce` arrives it becomes
//! a [`ElectionState::Peer`] of that relay; if it sends `poll_limit` queries
//! without hearing one it elects itself and becomes the
//! [`ElectionState::Server`], answering future queries.
//!
//! # Tie-break
//!
//! Two peers that start together would both run out of polls and both
//! self-elect.  To make that less likely, a discovering peer remembers the
//! earliest `start_time_millis` seen in other peers' queries.  When its polls
//! run out and an older peer has been heard, it starts polling again instead
//! of electing itself, giving the older peer time to win and announce.
//!
//! This is a heuristic, not consensus: under unlucky timing zero or two relays
//! can still emerge.
//!
//! The machine does no I/O.  The UDP driver feeds it ticks and decoded
//! datagrams and carries out the [`ElectionAction`]s it returns.

use std::net::SocketAddr;

use tracing::{debug, info};

use crate::protocol::messages::{DiscoveryKind, DiscoveryMessage};

/// Fixed parameters of one election run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    pub api_version: u8,
    pub cluster_id: String,
    /// Queries to send before self-electing.
    pub poll_limit: u32,
    /// Port the local relay will listen on if this peer wins.
    pub server_port: u16,
    /// This process's start time, in milliseconds since the Unix epoch.
    pub start_time_millis: i64,
}

/// Where this peer stands in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Discovering,
    /// Joined the relay at this address.
    Peer(SocketAddr),
    Server,
}

/// Final result handed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// No relay answered: start one locally.
    Server,
    /// Connect to the relay at this address.
    Peer(SocketAddr),
}

/// What the driver must do after feeding the machine an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionAction {
    /// Send this datagram to the multicast group.
    Broadcast(DiscoveryMessage),
    /// The election finished for this peer.
    Decided(ElectionOutcome),
}

#[derive(Debug, Clone)]
pub struct Election {
    config: ElectionConfig,
    state: ElectionState,
    polls_sent: u32,
    earliest_rival: Option<i64>,
}

impl Election {
    pub fn new(config: ElectionConfig) -> Self {
        Self {
            config,
            state: ElectionState::Discovering,
            polls_sent: 0,
            earliest_rival: None,
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Advances the poll timer by one interval.
    pub fn on_tick(&mut self) -> Option<ElectionAction> {
        if self.state != ElectionState::Discovering {
            return None;
        }

        if self.polls_sent >= self.config.poll_limit {
            match self.earliest_rival {
                Some(rival) if rival < self.config.start_time_millis => {
                    debug!(
                        rival_start = rival,
                        own_start = self.config.start_time_millis,
                        "older peer seen; deferring self-election"
                    );
                    self.polls_sent = 0;
                    self.earliest_rival = None;
                }
                _ => {
                    info!("no relay answered after {} queries; electing self", self.polls_sent);
                    self.state = ElectionState::Server;
                    return Some(ElectionAction::Decided(ElectionOutcome::Server));
                }
            }
        }

        self.polls_sent += 1;
        Some(ElectionAction::Broadcast(DiscoveryMessage::query(
            self.config.cluster_id.clone(),
            self.config.start_time_millis,
        )))
    }

    /// Handles a datagram received from `from`.
    ///
    /// Datagrams from other clusters or API versions are ignored.
    pub fn on_message(
        &mut self,
        msg: &DiscoveryMessage,
        from: SocketAddr,
    ) -> Option<ElectionAction> {
        if !msg.is_compatible(self.config.api_version, &self.config.cluster_id) {
            return None;
        }

        match (self.state, msg.kind) {
            (ElectionState::Discovering, DiscoveryKind::ServerAnnounce) => {
                let relay = SocketAddr::new(from.ip(), msg.server_port);
                info!("relay announced at {relay}");
                self.state = ElectionState::Peer(relay);
                Some(ElectionAction::Decided(ElectionOutcome::Peer(relay)))
            }
            (ElectionState::Discovering, DiscoveryKind::Query) => {
                if msg.start_time_millis != self.config.start_time_millis {
                    let earliest = self
                        .earliest_rival
                        .map_or(msg.start_time_millis, |e| e.min(msg.start_time_millis));
                    self.earliest_rival = Some(earliest);
                }
                None
            }
            (ElectionState::Server, DiscoveryKind::Query) => {
                Some(ElectionAction::Broadcast(DiscoveryMessage::announce(
                    self.config.cluster_id.clone(),
                    self.config.start_time_millis,
                    self.config.server_port,
                )))
            }
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
