//! Module Exports
//!
//! This file exports the controller modules of the mirroring engine.
//!
//! - `bus`: register-level servo bus access and pair initialization
//! - `mirror`: the mirroring session state machine and its command queue
//! - `grip`: auxiliary gripper driven over PWM

pub mod bus;
pub mod grip;
pub mod mirror;

pub use grip::GRIP_CHANNEL;
pub use mirror::SESSION_CHANNEL;

use crate::utils::config::{BusRegisters, JointMap};
use bus::{RegisterTransport, ServoBus};
use mirror::{Command, JointOutcome, MirrorSession, SessionEvent};

/// Owns the servo bus and the mirroring session, draining `SESSION_CHANNEL`
/// strictly in arrival order.
pub struct MirrorController<T: RegisterTransport> {
    bus: ServoBus<T>,
    session: MirrorSession,
}

impl<T: RegisterTransport> MirrorController<T> {
    /// Wrap an already-open transport and prepare every configured pair.
    pub fn new(
        transport: T,
        registers: BusRegisters,
        map: JointMap,
    ) -> Self {
        let mut bus = ServoBus::new(transport, registers);
        bus.initialize_pairs(&map);
        let session = MirrorSession::new(map);
        MirrorController { bus, session }
    }

    /// Process session events forever.
    pub async fn session_loop(&mut self) -> ! {
        loop {
            let event = SESSION_CHANNEL.receiver().receive().await;
            self.handle(event);
        }
    }

    /// Apply one event and log the per-joint outcomes.
    pub fn handle(
        &mut self,
        event: SessionEvent,
    ) {
        match event {
            SessionEvent::Command(Command::PositionUpdate(positions)) => {
                let outcomes = self.session.apply_update(&mut self.bus, &positions);
                for (leader, outcome) in outcomes {
                    match outcome {
                        JointOutcome::Moved { follower, target } => {
                            tracing::info!("leader {} -> follower {} at {}", leader, follower, target)
                        }
                        JointOutcome::Anchored => tracing::info!("leader {} anchored", leader),
                        JointOutcome::Unmapped => {
                            tracing::debug!("no follower mapped to leader {}, skipping", leader)
                        }
                        JointOutcome::WriteFailed { follower } => {
                            tracing::warn!("follower {} did not accept its goal", follower)
                        }
                    }
                }
            }
            SessionEvent::Command(Command::Reset) => {
                tracing::info!("reset: homing followers and dropping baselines");
                self.session.reset(&mut self.bus);
            }
            SessionEvent::Disconnected => {
                tracing::info!("link closed, dropping baselines");
                self.session.disconnect();
            }
        }
    }

    /// The session state, e.g. for inspection in tests.
    pub fn session(&self) -> &MirrorSession {
        &self.session
    }

    /// The servo bus, e.g. for inspection in tests.
    pub fn bus_mut(&mut self) -> &mut ServoBus<T> {
        &mut self.bus
    }
}
