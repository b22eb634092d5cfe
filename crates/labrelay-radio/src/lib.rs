//! LoRa radio link driver
//!
//! Drives a Semtech SX1276/77/78 (RA-01 class) transceiver directly through its
//! register set instead of relying on a vendor library's blocking state
//! machine. Every operation has a hard deadline, and a wedged radio is
//! recovered autonomously with a hardware reset followed by a full register
//! re-program.
//!
//! # Contract
//!
//! - [`LoRaLink::initialize`] resets the chip, checks the version register and
//!   programs the modem; the radio rests in RX continuous mode afterwards.
//! - [`LoRaLink::transmit`] is rate limited by a guard interval and bounded by a
//!   transmit-done timeout. A timeout triggers self-heal.
//! - [`LoRaLink::poll_receive`] never blocks and never fails. It also runs the
//!   receive-mode watchdog and the periodic health check.
//!
//! Hardware access goes through the [`RadioBus`] and [`Clock`] traits. An
//! `embedded-hal` implementation ([`SpiRadioBus`]) is provided for real boards,
//! and [`sim`] contains a register-level chip model for host-side testing.

mod config;
mod diag;
mod driver;
mod error;
mod hal;
pub mod registers;
pub mod sim;

pub use config::*;
pub use diag::*;
pub use driver::*;
pub use error::*;
pub use hal::*;
