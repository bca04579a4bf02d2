// Licensed under the Apache-2.0 license

//! Non-blocking I2C master driver.
//!
//! The driver is split the same way the bus is: a peripheral abstraction that only knows
//! how to start actions and report status bits ([`traits`]), edge detection on those bits
//! ([`status`]), a retry timer ([`timer`]), the protocol state machine ([`fsm`]), the shared
//! device registry ([`registry`]) and the poll-driven engine tying them together
//! ([`engine`]). [`i2c_controller`] adds a blocking layer for code that owns the bus.
//!
//! ```rust,ignore
//! let mut ctx = I2cMasterContext::<_, 4>::new(peripheral, EngineConfig::default());
//! let eeprom = ctx.register_device(0x50, &mut tx, &mut rx)?;
//! ctx.begin_transfer(eeprom, 2, 16, false)?;
//! loop {
//!     if ctx.poll() == Some(eeprom) {
//!         break;
//!     }
//! }
//! let counts = ctx.transfer_result(eeprom)?;
//! ```

pub mod common;
pub mod engine;
pub mod fsm;
pub mod i2c_controller;
pub mod registry;
pub mod status;
pub mod timer;
pub mod traits;

#[cfg(test)]
pub(crate) mod mock;

pub use common::{EngineConfig, EngineConfigBuilder, Error, TransferCounts};
pub use engine::I2cMasterContext;
pub use i2c_controller::I2cController;
pub use registry::{DeviceHandle, DeviceState};
pub use traits::{I2cHardwareCore, I2cMasterCommands, I2cPeripheral};
