//! Cursor-watch loop: turns cursor motion into zone crossings.
//!
//! Every `poll` interval the watcher samples the cursor and compares it with
//! the previous sample.  The first cached zone whose bounds contain the new
//! position and whose direction matches the motion produces an
//! [`AgentEvent::ZoneCrossed`] carrying the position projected onto the
//! target peer.
//!
//! The zone list is read through a `watch` channel.  The agent replaces it
//! wholesale on every assignment, so the watcher never needs a lock; it just
//! borrows the current list for the duration of one check.
//!
//! A second `watch` channel carries cursor warps published by the agent.  A
//! warp becomes the new baseline sample and no crossing is checked on that
//! tick, so a programmatic jump is never read as user motion.

use std::sync::Arc;
use std::time::Duration;

use kvm_mesh_core::{TransitionZone, Vector2};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::handle_focus::AgentEvent;
use crate::infrastructure::display::DisplayServer;

/// Returns the first zone triggered by a move from `last` to `current`.
pub fn find_crossing(
    zones: &[TransitionZone],
    current: Vector2,
    last: Vector2,
) -> Option<&TransitionZone> {
    zones.iter().find(|zone| zone.should_transition(current, last))
}

/// Polls the cursor until `cancel` fires or the agent's queue closes.
pub async fn watch_zones(
    display: Arc<dyn DisplayServer>,
    zones: watch::Receiver<Vec<TransitionZone>>,
    mut warps: watch::Receiver<Vector2>,
    events: mpsc::Sender<AgentEvent>,
    poll: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<Vector2> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if warps.has_changed().unwrap_or(false) {
            let warp = *warps.borrow_and_update();
            trace!(pos = ?warp, "cursor warped by agent");
            last = Some(warp);
            continue;
        }

        let current = match display.cursor_position() {
            Ok(pos) => pos,
            Err(e) => {
                trace!("cursor sample failed: {e}");
                continue;
            }
        };
        let Some(previous) = last.replace(current) else {
            continue;
        };
        if previous == current {
            continue;
        }

        let crossing = {
            let zones = zones.borrow();
            find_crossing(&zones, current, previous)
                .map(|zone| (zone.target.peer_id, zone.project(current)))
        };

        if let Some((target, cursor_pos)) = crossing {
            if events
                .send(AgentEvent::ZoneCrossed { target, cursor_pos })
                .await
                .is_err()
            {
                break;
            }
        }
    }
    debug!("cursor watch stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
