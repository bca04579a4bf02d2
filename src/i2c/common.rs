// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C master engine.
//!
//! This module provides the shared error type, the engine configuration and its builder,
//! and the address helpers used across the driver implementation.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, SevenBitAddress};
use fugit::MillisDurationU32;

/// Retries granted to every bus command before the transaction is aborted.
pub const DEFAULT_RETRY_BUDGET: u8 = 5;

/// Ticks per retry period when nothing else is configured.
pub const DEFAULT_TIMER_PERIOD: u16 = 10;

/// Highest valid 7-bit address.
pub const MAX_SEVEN_BIT_ADDRESS: SevenBitAddress = 0x7f;

/// Errors reported by the engine.
///
/// `DeviceBusy`, `InvalidDevice`, `InvalidAddress`, `RegistryFull`, `BufferTooSmall` and
/// `ResultPending` are returned synchronously. `AddressNack`, `DataNack` and
/// `RetryExhausted` are recorded on the device and surface through the result accessors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Another transaction owns the bus.
    DeviceBusy,
    /// The slave did not acknowledge its address.
    AddressNack,
    /// The slave did not acknowledge a data byte.
    DataNack,
    /// The peripheral never completed an action within the retry budget.
    RetryExhausted,
    /// The handle does not name a registered device.
    InvalidDevice,
    /// The address does not fit in 7 bits.
    InvalidAddress(u8),
    /// No slot left in the device registry.
    RegistryFull,
    /// A transfer asked for more bytes than the lent buffer holds.
    BufferTooSmall,
    /// The previous result on this device has not been acknowledged.
    ResultPending,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            _ => ErrorKind::Other,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::DeviceBusy => f.write_str("bus is busy with another transaction"),
            Error::AddressNack => f.write_str("slave did not acknowledge its address"),
            Error::DataNack => f.write_str("slave did not acknowledge a data byte"),
            Error::RetryExhausted => f.write_str("retry budget exhausted"),
            Error::InvalidDevice => f.write_str("unknown device handle"),
            Error::InvalidAddress(addr) => write!(f, "address {addr:#04x} is not 7-bit"),
            Error::RegistryFull => f.write_str("device registry is full"),
            Error::BufferTooSmall => f.write_str("transfer length exceeds buffer"),
            Error::ResultPending => f.write_str("previous result not acknowledged"),
        }
    }
}

impl core::error::Error for Error {}

/// Bytes moved by a transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferCounts {
    pub written: usize,
    pub read: usize,
}

/// Address byte with the R/W bit in position 0.
#[must_use]
pub const fn address_byte(address: SevenBitAddress, read: bool) -> u8 {
    (address << 1) | read as u8
}

/// Rejects addresses that need more than 7 bits.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] for anything above `0x7f`.
pub fn validate_address(address: SevenBitAddress) -> Result<SevenBitAddress, Error> {
    if address > MAX_SEVEN_BIT_ADDRESS {
        Err(Error::InvalidAddress(address))
    } else {
        Ok(address)
    }
}

/// Timing and policy knobs of an [`crate::i2c::I2cMasterContext`], fixed at construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    /// Poll ticks per retry period.
    pub timer_period: u16,
    /// Retry periods granted to each bus command.
    pub retry_budget: u8,
    /// Abort to STOP as soon as a NACK is seen instead of waiting out the retry budget.
    pub abort_on_nack: bool,
    /// Start queued requests from `poll` without caller intervention.
    pub auto_schedule: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::new().build()
    }
}

/// Chained builder for [`EngineConfig`], starting from the defaults.
pub struct EngineConfigBuilder {
    timer_period: u16,
    retry_budget: u8,
    abort_on_nack: bool,
    auto_schedule: bool,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timer_period: DEFAULT_TIMER_PERIOD,
            retry_budget: DEFAULT_RETRY_BUDGET,
            abort_on_nack: true,
            auto_schedule: true,
        }
    }
    /// Period in poll ticks; zero is raised to one.
    #[must_use]
    pub fn timer_period(mut self, ticks: u16) -> Self {
        self.timer_period = ticks.max(1);
        self
    }
    /// Derives the period from a timeout and the interval between `poll` calls.
    #[must_use]
    pub fn timeout(mut self, timeout: MillisDurationU32, tick: MillisDurationU32) -> Self {
        let tick_ms = tick.to_millis().max(1);
        let ticks = timeout.to_millis().div_ceil(tick_ms).max(1);
        self.timer_period = u16::try_from(ticks).unwrap_or(u16::MAX);
        self
    }
    /// Retry budget; zero is raised to one.
    #[must_use]
    pub fn retry_budget(mut self, retries: u8) -> Self {
        self.retry_budget = retries.max(1);
        self
    }
    /// Stop on the first NACK (`true`, default) or leave it to the retry timer.
    #[must_use]
    pub fn abort_on_nack(mut self, enabled: bool) -> Self {
        self.abort_on_nack = enabled;
        self
    }
    /// Let `poll` start queued requests (`true`, default) or wait for `start_next`.
    #[must_use]
    pub fn auto_schedule(mut self, enabled: bool) -> Self {
        self.auto_schedule = enabled;
        self
    }
    #[must_use]
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            timer_period: self.timer_period,
            retry_budget: self.retry_budget,
            abort_on_nack: self.abort_on_nack,
            auto_schedule: self.auto_schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::Error as _;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.timer_period, DEFAULT_TIMER_PERIOD);
        assert_eq!(config.retry_budget, DEFAULT_RETRY_BUDGET);
        assert!(config.abort_on_nack);
        assert!(config.auto_schedule);
    }

    #[test]
    fn test_builder_clamps_zero() {
        let config = EngineConfigBuilder::new()
            .timer_period(0)
            .retry_budget(0)
            .build();

        assert_eq!(config.timer_period, 1);
        assert_eq!(config.retry_budget, 1);
    }

    #[test]
    fn test_timeout_rounds_up_to_whole_ticks() {
        let config = EngineConfigBuilder::new()
            .timeout(MillisDurationU32::millis(25), MillisDurationU32::millis(10))
            .build();

        assert_eq!(config.timer_period, 3);
    }

    #[test]
    fn test_address_byte_encodes_direction() {
        assert_eq!(address_byte(0x50, false), 0xa0);
        assert_eq!(address_byte(0x50, true), 0xa1);
    }

    #[test]
    fn test_validate_address() {
        assert_eq!(validate_address(0x7f), Ok(0x7f));
        assert_eq!(validate_address(0x80), Err(Error::InvalidAddress(0x80)));
    }

    #[test]
    fn test_error_kind_maps_nacks() {
        assert_eq!(
            Error::AddressNack.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
        assert_eq!(
            Error::DataNack.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        );
        assert_eq!(Error::RetryExhausted.kind(), ErrorKind::Other);
    }
}
