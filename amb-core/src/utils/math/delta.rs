//! Delta engine for relative position mirroring.
//!
//! Converts an absolute leader reading into a follower goal position: shortest
//! signed delta across the cyclic encoder seam, optional direction reversal,
//! per-joint gain, and clamping into the valid range.
//!
//! # Example
//! ```rust
//! use amb_core::utils::config::JointConfig;
//! use amb_core::utils::math::delta;
//! let cfg = JointConfig::default();
//! assert_eq!(delta::follower_target(&cfg, 2050, 2000, 1000), 1050);
//! ```
//!
use crate::utils::config::{JointConfig, Position, ENCODER_RANGE, POSITION_MAX};

/// Half of the encoder range; any raw delta beyond it wrapped around the seam.
const HALF_RANGE: i32 = ENCODER_RANGE / 2;

/// Shortest signed displacement from `baseline` to `current` on the cyclic
/// encoder.
///
/// A reading that jumps from 4000 to 100 is a +196 move across the 0/4095
/// seam, not a -3900 one.
pub fn wrapped_delta(
    current: Position,
    baseline: Position,
) -> i32 {
    let mut delta = current as i32 - baseline as i32;
    if delta > HALF_RANGE {
        delta -= ENCODER_RANGE;
    } else if delta < -HALF_RANGE {
        delta += ENCODER_RANGE;
    }
    delta
}

/// Goal position for a follower given the leader's current reading and the
/// pair's baselines.
///
/// The scaled delta is truncated toward zero, and the result is clamped into
/// the valid encoder range whatever the input magnitude. A multiplier of zero
/// freezes the follower at its baseline.
pub fn follower_target(
    cfg: &JointConfig,
    leader_position: Position,
    leader_baseline: Position,
    follower_baseline: Position,
) -> Position {
    let mut delta = wrapped_delta(leader_position, leader_baseline);
    if cfg.reversed {
        delta = -delta;
    }
    let scaled = (delta as f64 * cfg.multiplier) as i32;
    let target = follower_baseline as i32 + scaled;
    target.clamp(0, POSITION_MAX as i32) as Position
}
