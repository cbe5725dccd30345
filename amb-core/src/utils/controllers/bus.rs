//! Servo bus access for the Arm-Mirror Bot.
//!
//! Wraps a register-level transport into pair initialization and position
//! read/write helpers. The physical driver (serial port, protocol framing,
//! checksums) lives outside the core; only two logical registers matter to the
//! mirroring engine: present position (read) and goal position (write).

use crate::utils::config::{BusRegisters, JointId, JointMap, Position};

/// Register-level access to the servo bus.
///
/// `read_register` returns `None` when the servo does not answer; an unknown
/// position is not fatal and callers fall back to a configured default.
/// Implementations must bound every operation with their own timeout so a
/// stuck bus can never stall the session.
pub trait RegisterTransport {
    type Error: core::fmt::Debug;

    fn read_register(
        &mut self,
        id: JointId,
        reg: u8,
    ) -> Option<u16>;

    fn write_register(
        &mut self,
        id: JointId,
        reg: u8,
        value: u16,
    ) -> Result<(), Self::Error>;
}

/// Errors that can occur when driving servos over the bus.
#[derive(Debug)]
pub enum BusError<E: core::fmt::Debug> {
    /// A register write was rejected by the servo at the given id.
    Write(JointId, E),
}

/// High-level helpers over a raw register transport.
pub struct ServoBus<T: RegisterTransport> {
    transport: T,
    registers: BusRegisters,
}

impl<T: RegisterTransport> ServoBus<T> {
    pub fn new(
        transport: T,
        registers: BusRegisters,
    ) -> Self {
        ServoBus {
            transport,
            registers,
        }
    }

    /// Present position of a servo, or `None` when it does not answer.
    pub fn read_position(
        &mut self,
        id: JointId,
    ) -> Option<Position> {
        self.transport
            .read_register(id, self.registers.present_position)
    }

    /// Command a servo to the given goal position.
    pub fn write_goal(
        &mut self,
        id: JointId,
        position: Position,
    ) -> Result<(), BusError<T::Error>> {
        self.transport
            .write_register(id, self.registers.goal_position, position)
            .map_err(|e| BusError::Write(id, e))
    }

    fn set_torque(
        &mut self,
        id: JointId,
        enabled: bool,
    ) -> Result<(), BusError<T::Error>> {
        self.transport
            .write_register(id, self.registers.torque_enable, enabled as u16)
            .map_err(|e| BusError::Write(id, e))
    }

    fn set_position_mode(
        &mut self,
        id: JointId,
    ) -> Result<(), BusError<T::Error>> {
        self.transport
            .write_register(id, self.registers.operating_mode, 0)
            .map_err(|e| BusError::Write(id, e))
    }

    /// Put every configured pair into position mode.
    ///
    /// Torque is released on both ends first, then re-engaged on the follower
    /// only, so the leader stays free to move by hand. A failing pair is
    /// logged and skipped; the remaining pairs are still initialized.
    pub fn initialize_pairs(
        &mut self,
        map: &JointMap,
    ) {
        for pair in map.pairs() {
            match self.initialize_pair(pair.leader, pair.follower) {
                Ok(()) => tracing::info!(
                    "initialized leader {} (torque off), follower {} (torque on)",
                    pair.leader,
                    pair.follower
                ),
                Err(e) => tracing::error!(
                    "failed to initialize pair {}-{}: {:?}",
                    pair.leader,
                    pair.follower,
                    e
                ),
            }
        }
    }

    fn initialize_pair(
        &mut self,
        leader: JointId,
        follower: JointId,
    ) -> Result<(), BusError<T::Error>> {
        self.set_torque(follower, false)?;
        self.set_torque(leader, false)?;
        self.set_position_mode(follower)?;
        self.set_position_mode(leader)?;
        self.set_torque(follower, true)
    }

    /// Access the underlying transport, e.g. for inspection in tests.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
