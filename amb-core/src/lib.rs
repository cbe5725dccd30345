//! Core teleoperation engine for the Arm-Mirror Bot on no-std embedded platforms.
//!
//! For a runnable mock host, see the `amb-app/` directory.
#![no_std]

pub mod utils;
