// Licensed under the Apache-2.0 license

//! Slave device registry and round-robin arbitration.
//!
//! Devices live in a fixed-capacity arena and are named by [`DeviceHandle`]: an index plus
//! the id of the registry that issued it, so a handle from another context is rejected.
//! The circular service order is index order with wrap-around, so the registry visits
//! devices in the order they were registered.
//!
//! Buffers are lent to the registry for its whole lifetime `'a`. The caller reaches them
//! again only through accessors that refuse access while a transfer is queued or running.

use core::sync::atomic::{AtomicU16, Ordering};

use embedded_hal::i2c::SevenBitAddress;
use heapless::Vec;

use crate::i2c::common::{address_byte, validate_address, Error, TransferCounts};
use crate::i2c::fsm::{Signal, State, TransactionEvent, TransferView};

static NEXT_REGISTRY_ID: AtomicU16 = AtomicU16::new(0);

fn next_registry_id() -> u16 {
    #[cfg(target_has_atomic = "16")]
    {
        NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed)
    }
    // load/store only (thumbv6m): contexts are created from one thread of control
    #[cfg(not(target_has_atomic = "16"))]
    {
        let id = NEXT_REGISTRY_ID.load(Ordering::Relaxed);
        NEXT_REGISTRY_ID.store(id.wrapping_add(1), Ordering::Relaxed);
        id
    }
}

/// Stable name of a registered device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle {
    registry: u16,
    index: usize,
}

impl DeviceHandle {
    /// Position in the registry, which is also the round-robin position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    #[default]
    Idle,
    /// Waiting in the round-robin queue.
    Requested,
    /// Bound to the state machine.
    InProgress,
}

pub struct SlaveDevice<'a> {
    address: SevenBitAddress,
    write_buffer: &'a mut [u8],
    read_buffer: &'a mut [u8],
    pub(crate) bytes_to_send: usize,
    pub(crate) bytes_to_read: usize,
    pub(crate) write_count: usize,
    pub(crate) read_count: usize,
    pub(crate) state: DeviceState,
    pub(crate) finished: bool,
    pub(crate) error: Option<Error>,
    pub(crate) generate_repeated_start: bool,
    pub(crate) repeated_start_issued: bool,
}

impl<'a> SlaveDevice<'a> {
    fn new(address: SevenBitAddress, write_buffer: &'a mut [u8], read_buffer: &'a mut [u8]) -> Self {
        Self {
            address,
            write_buffer,
            read_buffer,
            bytes_to_send: 0,
            bytes_to_read: 0,
            write_count: 0,
            read_count: 0,
            state: DeviceState::Idle,
            finished: false,
            error: None,
            generate_repeated_start: false,
            repeated_start_issued: false,
        }
    }

    #[must_use]
    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    #[must_use]
    pub fn counts(&self) -> TransferCounts {
        TransferCounts {
            written: self.write_count,
            read: self.read_count,
        }
    }

    /// Received bytes so far.
    #[must_use]
    pub fn read_data(&self) -> &[u8] {
        self.read_buffer.get(..self.read_count).unwrap_or_default()
    }

    /// Checks that a new transfer may be set up on this device.
    pub(crate) fn check_ready(&self, bytes_to_send: usize, bytes_to_read: usize) -> Result<(), Error> {
        if self.state != DeviceState::Idle {
            return Err(Error::DeviceBusy);
        }
        if self.finished {
            return Err(Error::ResultPending);
        }
        if bytes_to_send > self.write_buffer.len() || bytes_to_read > self.read_buffer.len() {
            return Err(Error::BufferTooSmall);
        }
        Ok(())
    }

    pub(crate) fn prepare(&mut self, bytes_to_send: usize, bytes_to_read: usize, repeated_start: bool) {
        self.bytes_to_send = bytes_to_send;
        self.bytes_to_read = bytes_to_read;
        self.write_count = 0;
        self.read_count = 0;
        self.error = None;
        self.generate_repeated_start = repeated_start;
    }

    /// Clears the result so the device can take a new transfer.
    pub(crate) fn acknowledge(&mut self) {
        self.finished = false;
        self.error = None;
        self.write_count = 0;
        self.read_count = 0;
    }

    /// The write phase is over and bytes are still expected from the slave.
    pub(crate) fn master_read(&self) -> bool {
        self.write_count >= self.bytes_to_send && self.bytes_to_read > 0
    }

    pub(crate) fn event(&self, signal: Signal) -> TransactionEvent {
        let master_read = self.master_read();
        TransactionEvent {
            signal,
            slave_address: address_byte(self.address, master_read),
            master_read,
            generate_repeated_start: self.generate_repeated_start,
            repeated_start_already_issued: self.repeated_start_issued,
        }
    }

    pub(crate) fn view(&self, state: State, acknowledged: bool, abort_on_nack: bool) -> TransferView {
        // in WriteData the byte at write_count is on the wire
        let next_index = match state {
            State::WriteData => self.write_count.saturating_add(1),
            _ => self.write_count,
        };
        let next_write = if next_index < self.bytes_to_send {
            self.write_buffer.get(next_index).copied()
        } else {
            None
        };
        TransferView {
            acknowledged,
            next_write,
            read_remaining: self.bytes_to_read.saturating_sub(self.read_count),
            read_follows: !self.master_read() && self.bytes_to_read > 0,
            abort_on_nack,
        }
    }

    pub(crate) fn advance_write(&mut self) {
        self.write_count = self.write_count.saturating_add(1).min(self.bytes_to_send);
    }

    pub(crate) fn store_received(&mut self, byte: u8) {
        if let Some(slot) = self.read_buffer.get_mut(self.read_count) {
            *slot = byte;
            self.read_count = self.read_count.saturating_add(1);
        }
    }

    pub(crate) fn complete(&mut self, error: Option<Error>) {
        self.state = DeviceState::Idle;
        self.finished = true;
        if error.is_some() {
            self.error = error;
        }
    }

    fn write_buffer_mut(&mut self) -> &mut [u8] {
        &mut *self.write_buffer
    }
}

/// Arena of slave devices with a round-robin cursor.
pub struct DeviceRegistry<'a, const N: usize> {
    id: u16,
    devices: Vec<SlaveDevice<'a>, N>,
    cursor: usize,
    busy: bool,
    bus_owner: Option<DeviceHandle>,
}

impl<const N: usize> Default for DeviceRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> DeviceRegistry<'a, N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_registry_id(),
            devices: Vec::new(),
            cursor: 0,
            busy: false,
            bus_owner: None,
        }
    }

    /// Adds a device in O(1).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] for addresses above `0x7f`, [`Error::RegistryFull`] when
    /// all `N` slots are taken.
    pub fn register(
        &mut self,
        address: SevenBitAddress,
        write_buffer: &'a mut [u8],
        read_buffer: &'a mut [u8],
    ) -> Result<DeviceHandle, Error> {
        let address = validate_address(address)?;
        let handle = self.handle(self.devices.len());
        self.devices
            .push(SlaveDevice::new(address, write_buffer, read_buffer))
            .map_err(|_| Error::RegistryFull)?;
        Ok(handle)
    }

    /// # Errors
    ///
    /// [`Error::InvalidDevice`] if the handle is not registered here.
    pub fn get(&self, handle: DeviceHandle) -> Result<&SlaveDevice<'a>, Error> {
        self.owns(handle)?;
        self.devices.get(handle.index).ok_or(Error::InvalidDevice)
    }

    /// # Errors
    ///
    /// [`Error::InvalidDevice`] if the handle is not registered here.
    pub fn get_mut(&mut self, handle: DeviceHandle) -> Result<&mut SlaveDevice<'a>, Error> {
        self.owns(handle)?;
        self.devices.get_mut(handle.index).ok_or(Error::InvalidDevice)
    }

    /// First device registered at `address`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDevice`] if no device uses that address.
    pub fn find(&self, address: SevenBitAddress) -> Result<DeviceHandle, Error> {
        self.devices
            .iter()
            .position(|device| device.address == address)
            .map(|index| self.handle(index))
            .ok_or(Error::InvalidDevice)
    }

    fn owns(&self, handle: DeviceHandle) -> Result<(), Error> {
        if handle.registry == self.id {
            Ok(())
        } else {
            Err(Error::InvalidDevice)
        }
    }

    fn handle(&self, index: usize) -> DeviceHandle {
        DeviceHandle {
            registry: self.id,
            index,
        }
    }

    /// Write buffer for refilling between transfers.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceBusy`] while the device is queued or on the bus.
    pub fn write_buffer_mut(&mut self, handle: DeviceHandle) -> Result<&mut [u8], Error> {
        let device = self.get_mut(handle)?;
        if device.state != DeviceState::Idle {
            return Err(Error::DeviceBusy);
        }
        Ok(device.write_buffer_mut())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Device holding the bus after ending a segment with a repeated start.
    #[must_use]
    pub fn bus_owner(&self) -> Option<DeviceHandle> {
        self.bus_owner
    }

    pub(crate) fn set_bus_owner(&mut self, owner: Option<DeviceHandle>) {
        self.bus_owner = owner;
    }

    /// `true` if `handle` may start a transaction now.
    #[must_use]
    pub fn may_start(&self, handle: DeviceHandle) -> bool {
        !self.busy && self.bus_owner.is_none_or(|owner| owner == handle)
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor just past `handle`.
    pub(crate) fn advance_past(&mut self, handle: DeviceHandle) {
        if !self.devices.is_empty() {
            self.cursor = handle.index.saturating_add(1) % self.devices.len();
        }
    }

    /// First requested device at or after the cursor, wrapping around.
    #[must_use]
    pub fn next_pending(&self) -> Option<DeviceHandle> {
        let len = self.devices.len();
        (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .find(|&index| {
                self.devices
                    .get(index)
                    .is_some_and(|device| device.state == DeviceState::Requested)
            })
            .map(|index| self.handle(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceHandle, &SlaveDevice<'a>)> {
        self.devices
            .iter()
            .enumerate()
            .map(|(index, device)| (self.handle(index), device))
    }
}
