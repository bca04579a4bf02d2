// Licensed under the Apache-2.0 license

//! Blocking convenience layer over [`I2cMasterContext`].
//!
//! Each call starts a transfer on a registered device and drives
//! [`I2cMasterContext::poll`] until the result is ready, then acknowledges it. Termination
//! is guaranteed by the retry timer. Use it from code that owns the bus exclusively, such
//! as board bring-up or tests; cooperative code should call the context directly.
//!
//! The controller also implements [`embedded_hal::i2c::I2c`]. A bus address is resolved to
//! the first device registered at it, so drivers written against `embedded-hal` run on top
//! of the engine unchanged.

use embedded_hal::i2c::{Operation, SevenBitAddress};

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{Error, TransferCounts};
use crate::i2c::engine::I2cMasterContext;
use crate::i2c::registry::DeviceHandle;
use crate::i2c::traits::I2cPeripheral;

pub struct I2cController<'a, P: I2cPeripheral, const N: usize, L: Logger = NoOpLogger> {
    pub context: I2cMasterContext<'a, P, N, L>,
}

impl<P: I2cPeripheral, const N: usize, L: Logger> embedded_hal::i2c::ErrorType
    for I2cController<'_, P, N, L>
{
    type Error = Error;
}

impl<P: I2cPeripheral, const N: usize, L: Logger> embedded_hal::i2c::I2c
    for I2cController<'_, P, N, L>
{
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let device = self.context.find_device(addr)?;
        self.device_read(device, buffer)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        let device = self.context.find_device(addr)?;
        self.device_write(device, bytes)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        let device = self.context.find_device(addr)?;
        self.device_write_read(device, bytes, buffer)
    }

    /// Runs `operations` as one bus transaction.
    ///
    /// Adjacent writes followed by adjacent reads form one engine transfer. Every transfer
    /// but the last ends in a repeated start, so the device keeps the bus and START is
    /// issued only once.
    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let device = self.context.find_device(addr)?;
        let result = self.run_operations(device, operations);
        if result.is_err() {
            self.release(device);
        }
        result
    }
}

impl<'a, P: I2cPeripheral, const N: usize, L: Logger> I2cController<'a, P, N, L> {
    pub fn new(context: I2cMasterContext<'a, P, N, L>) -> Self {
        Self { context }
    }

    /// Runs one transfer to completion and acknowledges its result.
    ///
    /// # Errors
    ///
    /// Any synchronous error of [`I2cMasterContext::begin_transfer`], or the error the
    /// transaction ended with.
    pub fn transfer(
        &mut self,
        device: DeviceHandle,
        bytes_to_send: usize,
        bytes_to_read: usize,
        repeated_start: bool,
    ) -> Result<TransferCounts, Error> {
        self.execute(device, bytes_to_send, bytes_to_read, repeated_start, |_| Ok(()))
    }

    /// Copies `bytes` into the device's write buffer and sends them.
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooSmall`] if `bytes` does not fit, otherwise as [`Self::transfer`].
    pub fn device_write(&mut self, device: DeviceHandle, bytes: &[u8]) -> Result<(), Error> {
        self.load(device, bytes)?;
        self.execute(device, bytes.len(), 0, false, |_| Ok(()))
            .map(|_| ())
    }

    /// Fills `buffer` from the device.
    ///
    /// # Errors
    ///
    /// As [`Self::transfer`].
    pub fn device_read(&mut self, device: DeviceHandle, buffer: &mut [u8]) -> Result<(), Error> {
        let len = buffer.len();
        self.execute(device, 0, len, false, |data| copy_into(buffer, data))
            .map(|_| ())
    }

    /// Sends `bytes`, then reads into `buffer` after a repeated start.
    ///
    /// # Errors
    ///
    /// As [`Self::device_write`].
    pub fn device_write_read(
        &mut self,
        device: DeviceHandle,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        self.load(device, bytes)?;
        let len = buffer.len();
        self.execute(device, bytes.len(), len, false, |data| copy_into(buffer, data))
            .map(|_| ())
    }

    fn run_operations(
        &mut self,
        device: DeviceHandle,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        let mut rest = operations;
        while !rest.is_empty() {
            let writes = rest
                .iter()
                .take_while(|op| matches!(op, Operation::Write(_)))
                .count();
            let reads = rest
                .iter()
                .skip(writes)
                .take_while(|op| matches!(op, Operation::Read(_)))
                .count();
            let Some((segment, tail)) =
                core::mem::take(&mut rest).split_at_mut_checked(writes.saturating_add(reads))
            else {
                break;
            };
            rest = tail;

            let sent = self.load_operations(device, segment)?;
            let to_read = segment
                .iter()
                .map(|op| match op {
                    Operation::Read(buffer) => buffer.len(),
                    Operation::Write(_) => 0,
                })
                .sum();
            let hold = !rest.is_empty();
            self.execute(device, sent, to_read, hold, |data| scatter(segment, data))?;
        }
        Ok(())
    }

    fn execute<F>(
        &mut self,
        device: DeviceHandle,
        bytes_to_send: usize,
        bytes_to_read: usize,
        repeated_start: bool,
        unload: F,
    ) -> Result<TransferCounts, Error>
    where
        F: FnOnce(&[u8]) -> Result<(), Error>,
    {
        self.context
            .begin_transfer(device, bytes_to_send, bytes_to_read, repeated_start)?;
        let result = nb::block!({
            self.context.poll();
            self.context.transfer_result(device)
        });
        // copy out before the acknowledge resets the read cursor
        let copied = match &result {
            Ok(_) => self.context.read_data(device).and_then(unload),
            Err(_) => Ok(()),
        };
        self.context.acknowledge(device)?;
        copied.and(result)
    }

    /// Gives up a bus left held by a transaction that failed halfway.
    fn release(&mut self, device: DeviceHandle) {
        if self.context.release_bus(device).is_err() {
            return;
        }
        while self.context.registry().bus_owner() == Some(device) {
            self.context.poll();
        }
    }

    fn load(&mut self, device: DeviceHandle, bytes: &[u8]) -> Result<(), Error> {
        let target = self
            .context
            .write_buffer_mut(device)?
            .get_mut(..bytes.len())
            .ok_or(Error::BufferTooSmall)?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Concatenates the write operations into the device's write buffer.
    fn load_operations(
        &mut self,
        device: DeviceHandle,
        operations: &[Operation<'_>],
    ) -> Result<usize, Error> {
        let buffer = self.context.write_buffer_mut(device)?;
        let mut sent = 0usize;
        for op in operations {
            if let Operation::Write(bytes) = op {
                let end = sent.saturating_add(bytes.len());
                buffer
                    .get_mut(sent..end)
                    .ok_or(Error::BufferTooSmall)?
                    .copy_from_slice(bytes);
                sent = end;
            }
        }
        Ok(sent)
    }
}

fn copy_into(buffer: &mut [u8], data: &[u8]) -> Result<(), Error> {
    buffer
        .get_mut(..data.len())
        .ok_or(Error::BufferTooSmall)?
        .copy_from_slice(data);
    Ok(())
}

/// Spreads received bytes over the read operations in order.
fn scatter(operations: &mut [Operation<'_>], mut data: &[u8]) -> Result<(), Error> {
    for op in operations {
        if let Operation::Read(buffer) = op {
            let (head, tail) = data
                .split_at_checked(buffer.len())
                .ok_or(Error::BufferTooSmall)?;
            buffer.copy_from_slice(head);
            data = tail;
        }
    }
    Ok(())
}
