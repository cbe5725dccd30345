//! Mirroring session for the Arm-Mirror Bot.
//!
//! Consumes position-update commands in arrival order and drives follower
//! servos by relative deltas measured from per-pair baselines. The first
//! update after a (re)connect or reset only anchors the reference frame;
//! every later update moves followers through the delta engine.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use hashbrown::HashMap;
use lazy_static::lazy_static;

use crate::utils::config::{JointId, JointMap, JointPair, Position};
use crate::utils::controllers::bus::{RegisterTransport, ServoBus};
use crate::utils::math::delta;

/// Queue carrying parsed session events from the link task to the controller,
/// strictly in arrival order. Reordering would corrupt the relative-position
/// invariant, so this is the only path between the two tasks.
pub static SESSION_CHANNEL: Channel<CriticalSectionRawMutex, SessionEvent, 16> = Channel::new();

lazy_static! {
    /// Last goal position each follower is known to hold, retained across
    /// sessions so a reconnect can anchor even when the servo will not answer
    /// a position read.
    static ref LAST_KNOWN: Mutex<CriticalSectionRawMutex, RefCell<HashMap<JointId, Position>>> =
        Mutex::new(RefCell::new(HashMap::new()));
}

fn record_last_known(
    id: JointId,
    position: Position,
) {
    LAST_KNOWN.lock(|m| {
        m.borrow_mut().insert(id, position);
    });
}

fn last_known(id: JointId) -> Option<Position> {
    LAST_KNOWN.lock(|m| m.borrow().get(&id).copied())
}

/// One application message from the leader side.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Absolute leader positions keyed by leader id.
    PositionUpdate(BTreeMap<JointId, Position>),
    /// Home the followers and drop all baselines.
    Reset,
}

/// Connection-level events delivered to the controller in FIFO order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Command(Command),
    /// Peer went away; baselines must not survive the connection.
    Disconnected,
}

/// Anchor recorded when a pair starts tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub leader: Position,
    pub follower: Position,
}

/// Per-joint result of applying one position update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointOutcome {
    /// Baseline established; an anchoring entry never moves the follower.
    Anchored,
    /// Goal position written to the mapped follower.
    Moved {
        follower: JointId,
        target: Position,
    },
    /// Leader id has no mapped follower. The mapping is intentionally
    /// partial, so this is informational, not a failure.
    Unmapped,
    /// The goal write was rejected; the rest of the batch still proceeds.
    WriteFailed { follower: JointId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// No baselines exist; the next update only establishes them.
    Unanchored,
    /// Baselines exist and updates move followers.
    Anchored,
}

/// State machine driving follower servos from leader position updates.
///
/// Holds the baseline store: one [`Baseline`] per active pair, created lazily
/// on the first update that mentions the pair's leader and cleared by a reset
/// or a disconnect. The defining invariant is that a follower's position
/// always equals its baseline plus the corrected leader delta since the last
/// anchor, clamped into the encoder range.
pub struct MirrorSession {
    map: JointMap,
    baselines: HashMap<JointId, Baseline>,
    state: SessionState,
}

impl MirrorSession {
    pub fn new(map: JointMap) -> Self {
        MirrorSession {
            map,
            baselines: HashMap::new(),
            state: SessionState::Unanchored,
        }
    }

    /// True once at least one pair has an established baseline.
    pub fn is_anchored(&self) -> bool {
        self.state == SessionState::Anchored
    }

    /// The baseline currently anchoring the given leader, if any.
    pub fn baseline(
        &self,
        leader: JointId,
    ) -> Option<Baseline> {
        self.baselines.get(&leader).copied()
    }

    /// Apply one position update, returning the outcome for every entry in
    /// the message.
    ///
    /// Entries are independent: an unmapped leader or a rejected write is
    /// reported and the remaining joints are still driven. One stuck actuator
    /// must not stall the rest of the arm.
    pub fn apply_update<T: RegisterTransport>(
        &mut self,
        bus: &mut ServoBus<T>,
        positions: &BTreeMap<JointId, Position>,
    ) -> Vec<(JointId, JointOutcome)> {
        let mut outcomes = Vec::with_capacity(positions.len());
        for (&leader, &position) in positions {
            let Some(pair) = self.map.follower_of(leader).copied() else {
                outcomes.push((leader, JointOutcome::Unmapped));
                continue;
            };
            let outcome = match self.baselines.get(&leader) {
                None => {
                    let follower = Self::anchor_position(bus, &pair);
                    self.baselines.insert(
                        leader,
                        Baseline {
                            leader: position,
                            follower,
                        },
                    );
                    JointOutcome::Anchored
                }
                Some(&base) => {
                    let target =
                        delta::follower_target(&pair.config, position, base.leader, base.follower);
                    match bus.write_goal(pair.follower, target) {
                        Ok(()) => {
                            record_last_known(pair.follower, target);
                            JointOutcome::Moved {
                                follower: pair.follower,
                                target,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                "goal write failed for follower {}: {:?}",
                                pair.follower,
                                e
                            );
                            JointOutcome::WriteFailed {
                                follower: pair.follower,
                            }
                        }
                    }
                }
            };
            outcomes.push((leader, outcome));
        }
        if self.state == SessionState::Unanchored && !self.baselines.is_empty() {
            self.state = SessionState::Anchored;
            tracing::info!("session anchored with {} pair(s)", self.baselines.len());
        }
        outcomes
    }

    /// The position a follower is anchored at: its present reading when the
    /// servo answers, else the last goal it is known to hold, else its
    /// configured starting position.
    fn anchor_position<T: RegisterTransport>(
        bus: &mut ServoBus<T>,
        pair: &JointPair,
    ) -> Position {
        if let Some(position) = bus.read_position(pair.follower) {
            return position;
        }
        if let Some(position) = last_known(pair.follower) {
            tracing::debug!(
                "follower {} not answering, anchoring at last known {}",
                pair.follower,
                position
            );
            return position;
        }
        pair.config.starting_position
    }

    /// Send every follower back to its configured starting position and drop
    /// the reference frame. The next update re-anchors from whatever
    /// positions both arms are in by then; either may have been repositioned
    /// by hand in the meantime.
    pub fn reset<T: RegisterTransport>(
        &mut self,
        bus: &mut ServoBus<T>,
    ) {
        for pair in self.map.pairs() {
            match bus.write_goal(pair.follower, pair.config.starting_position) {
                Ok(()) => record_last_known(pair.follower, pair.config.starting_position),
                Err(e) => tracing::warn!("failed to home follower {}: {:?}", pair.follower, e),
            }
        }
        self.baselines.clear();
        self.state = SessionState::Unanchored;
    }

    /// Drop all baselines without touching the servos. Used when the link
    /// goes away: a reconnect always starts unanchored.
    pub fn disconnect(&mut self) {
        self.baselines.clear();
        self.state = SessionState::Unanchored;
    }
}
