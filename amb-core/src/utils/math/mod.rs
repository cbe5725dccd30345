//! Math utilities for the Arm-Mirror Bot.
//!
//! This module provides delta computations for cyclic 12-bit position encoders.

pub mod delta;
