//! Static joint-mapping configuration for the mirroring engine.
//!
//! The historical control scripts carried hard-coded servo pair tables,
//! reversed-motor sets, and multiplier maps that drifted between otherwise
//! identical copies. Here that variation is data: one [`JointMap`] built at
//! startup and passed explicitly into the controller.

extern crate alloc;

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// Bus address of a single servo. Leader and follower ids are disjoint sets.
pub type JointId = u8;

/// Raw 12-bit encoder reading, `0..=4095`.
pub type Position = u16;

/// Size of the cyclic encoder range.
pub const ENCODER_RANGE: i32 = 4096;

/// Largest valid position value.
pub const POSITION_MAX: Position = 4095;

/// Centered fallback used when a servo's present position cannot be read.
pub const FALLBACK_POSITION: Position = 2048;

/// Per-follower correction parameters, immutable after startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    /// Invert the leader delta before scaling.
    #[serde(default)]
    pub reversed: bool,
    /// Gain applied to the corrected leader delta.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Position the follower is sent back to on reset.
    #[serde(default = "default_starting_position")]
    pub starting_position: Position,
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_starting_position() -> Position {
    FALLBACK_POSITION
}

impl Default for JointConfig {
    fn default() -> Self {
        JointConfig {
            reversed: false,
            multiplier: default_multiplier(),
            starting_position: default_starting_position(),
        }
    }
}

/// One leader/follower pairing with its correction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointPair {
    pub leader: JointId,
    pub follower: JointId,
    #[serde(default)]
    pub config: JointConfig,
}

impl JointPair {
    /// A pair with default correction parameters.
    pub fn new(
        leader: JointId,
        follower: JointId,
    ) -> Self {
        JointPair {
            leader,
            follower,
            config: JointConfig::default(),
        }
    }
}

/// Immutable bidirectional mapping between leader and follower joints.
///
/// The mapping is a partial bijection: a leader maps to at most one follower
/// and vice versa, and ids without a partner are legal (they are reported as
/// unmapped, never treated as errors).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointMap {
    pairs: Vec<JointPair>,
}

impl JointMap {
    pub fn new(pairs: Vec<JointPair>) -> Self {
        JointMap { pairs }
    }

    pub fn pairs(&self) -> &[JointPair] {
        &self.pairs
    }

    /// The pair driven by the given leader, if one is configured.
    pub fn follower_of(
        &self,
        leader: JointId,
    ) -> Option<&JointPair> {
        self.pairs.iter().find(|pair| pair.leader == leader)
    }

    /// The pair that drives the given follower, if one is configured.
    pub fn leader_of(
        &self,
        follower: JointId,
    ) -> Option<&JointPair> {
        self.pairs.iter().find(|pair| pair.follower == follower)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Servo register layout. Addresses are configuration, not engine logic.
///
/// The defaults match the historical bus layout this system shipped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRegisters {
    pub torque_enable: u8,
    pub operating_mode: u8,
    pub present_position: u8,
    pub goal_position: u8,
}

impl Default for BusRegisters {
    fn default() -> Self {
        BusRegisters {
            torque_enable: 40,
            operating_mode: 33,
            present_position: 56,
            goal_position: 42,
        }
    }
}
