// Licensed under the Apache-2.0 license

//! # I2C Peripheral Abstraction Traits
//!
//! The engine talks to the bus peripheral only through these traits. One implementation is
//! written per target MCU; register programming, clock setup and pin muxing stay on that
//! side of the boundary.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! I2cHardwareCore (status sampling and data registers)
//!     └── I2cMasterCommands (bus conditions and byte transfers)
//!             └── I2cPeripheral (blanket: everything the engine needs)
//! ```
//!
//! Every command returns immediately. Completion is never reported by the command itself;
//! the engine discovers it on a later poll by sampling [`BusStatus`].

use crate::i2c::status::BusStatus;

/// Read side of the peripheral: the live status bits and the data/ack registers.
///
/// Methods take `&mut self` because several peripherals clear flags on read.
pub trait I2cHardwareCore {
    /// Snapshot of the six "action in progress" bits.
    ///
    /// The hardware clears a bit by itself once the action completes, so a bit that was
    /// set and cleared between two samples is never observed high.
    fn status(&mut self) -> BusStatus;

    /// `true` if the slave acknowledged the last transmitted byte.
    fn acknowledge_status(&mut self) -> bool;

    /// `true` while the transmit holding register still holds a byte.
    fn is_transmit_register_full(&mut self) -> bool;

    /// `true` once a received byte is waiting in the input register.
    fn is_received_data_available(&mut self) -> bool;

    /// Takes the received byte out of the input register.
    fn received_byte(&mut self) -> u8;
}

/// Write side of the peripheral: every action the engine can start on the bus.
///
/// # Examples
///
/// ```rust,ignore
/// fn address_slave<P: I2cMasterCommands>(hw: &mut P, addr: u8) {
///     hw.issue_start();
///     // ... poll until the start condition is done ...
///     hw.transmit_byte(addr << 1);
/// }
/// ```
pub trait I2cMasterCommands: I2cHardwareCore {
    /// Generate a START condition.
    fn issue_start(&mut self);

    /// Generate a STOP condition.
    fn issue_stop(&mut self);

    /// Generate a repeated START condition.
    fn issue_restart(&mut self);

    /// Clock out ACK (`true`) or NACK (`false`) for the byte just received.
    fn send_ack(&mut self, ack: bool);

    /// Load a byte into the transmit register and shift it out.
    fn transmit_byte(&mut self, byte: u8);

    /// Clock in one byte from the slave.
    fn enable_receiver(&mut self);

    /// Stop clocking in data.
    fn disable_receiver(&mut self);
}

/// Complete peripheral as consumed by the engine.
pub trait I2cPeripheral: I2cHardwareCore + I2cMasterCommands {}

/// Blanket implementation: any type with the read and write sides is a usable peripheral
impl<T> I2cPeripheral for T where T: I2cHardwareCore + I2cMasterCommands {}
