//! Utility re-exports and helper macros for the Arm-Mirror Bot.
//!
//! This module re-exports the core components of the mirroring engine:
//!
//! - `config`: joint mapping tables and the servo register layout
//! - `connection`: message framing, the follower-side TCP link, and the
//!   leader-side position streamer
//! - `controllers`: servo bus access, the mirroring session, and the gripper
//! - `math`: delta computations for cyclic position encoders
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod connection;
pub mod controllers;
pub mod math;

pub use config::{BusRegisters, JointConfig, JointMap};
pub use connection::server::run as serve;
pub use controllers::MirrorController;
pub use embassy_time::*;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
