//! Link-layer firmware-flashing orchestrator for embedded access points
//! and routers.
//!
//! The crate listens on a raw Ethernet interface, identifies booting
//! devices by the fingerprints they emit during their recovery window and
//! serves each one the firmware image it asks for. Every device advances
//! independently through a detect, prepare, transfer, confirm lifecycle,
//! all driven from a single-threaded supervisor loop ([`flash::Flasher`]).

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod flash;
pub mod image;
pub mod logging;
pub mod node;
pub mod proto;
pub mod router;
pub mod signal;
pub mod tftp;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::error::FlashError;
pub use crate::flash::{Flasher, flash_start};
