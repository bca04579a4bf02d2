// Licensed under the Apache-2.0 license

//! Poll-driven I2C master engine.
//!
//! [`I2cMasterContext`] owns the peripheral, the transaction state machine, the retry timer
//! and the device registry. Nothing here blocks: the caller starts transfers and then calls
//! [`I2cMasterContext::poll`] from its tick. Each poll advances the timer by one tick,
//! samples the peripheral once and applies at most one state transition.

use embedded_hal::i2c::SevenBitAddress;

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{EngineConfig, Error, TransferCounts};
use crate::i2c::fsm::{transition, Effect, Signal, State, TransactionFsm};
use crate::i2c::registry::{DeviceHandle, DeviceRegistry, DeviceState};
use crate::i2c::status::Action;
use crate::i2c::timer::{RetryTimer, TimerEvent};
use crate::i2c::traits::I2cPeripheral;

/// One bus peripheral and up to `N` slave devices sharing it.
pub struct I2cMasterContext<'a, P: I2cPeripheral, const N: usize, L: Logger = NoOpLogger> {
    hw: P,
    config: EngineConfig,
    fsm: TransactionFsm,
    timer: RetryTimer,
    registry: DeviceRegistry<'a, N>,
    logger: L,
    // the active run is a STOP for a held bus, not a device transfer
    releasing: bool,
}

impl<'a, P: I2cPeripheral, const N: usize> I2cMasterContext<'a, P, N> {
    pub fn new(hw: P, config: EngineConfig) -> Self {
        Self::with_logger(hw, config, NoOpLogger)
    }
}

impl<'a, P: I2cPeripheral, const N: usize, L: Logger> I2cMasterContext<'a, P, N, L> {
    pub fn with_logger(hw: P, config: EngineConfig, logger: L) -> Self {
        Self {
            hw,
            config,
            fsm: TransactionFsm::new(),
            timer: RetryTimer::new(config.timer_period, config.retry_budget),
            registry: DeviceRegistry::new(),
            logger,
            releasing: false,
        }
    }

    /// Adds a slave device. The buffers stay lent to the context for its whole lifetime.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] or [`Error::RegistryFull`].
    pub fn register_device(
        &mut self,
        address: SevenBitAddress,
        write_buffer: &'a mut [u8],
        read_buffer: &'a mut [u8],
    ) -> Result<DeviceHandle, Error> {
        let handle = self.registry.register(address, write_buffer, read_buffer)?;
        self.logger.debug(format_args!(
            "i2c: registered device {} at {:#04x}",
            handle.index(),
            address
        ));
        Ok(handle)
    }

    /// Handle of the first device registered at `address`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDevice`] if no device uses that address.
    pub fn find_device(&self, address: SevenBitAddress) -> Result<DeviceHandle, Error> {
        self.registry.find(address)
    }

    /// Starts a transfer right away.
    ///
    /// The first `bytes_to_send` bytes of the write buffer are sent, then `bytes_to_read`
    /// bytes are read into the read buffer. With `repeated_start` the transaction ends with a
    /// RESTART instead of a STOP and the device keeps the bus for its next transfer.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidDevice`] for an unknown handle
    /// * [`Error::DeviceBusy`] while another transaction is running, the bus is held by
    ///   another device, or this device is already queued
    /// * [`Error::ResultPending`] if the previous result was not acknowledged
    /// * [`Error::BufferTooSmall`] if a length exceeds its buffer
    ///
    /// None of these touch the peripheral.
    pub fn begin_transfer(
        &mut self,
        handle: DeviceHandle,
        bytes_to_send: usize,
        bytes_to_read: usize,
        repeated_start: bool,
    ) -> Result<(), Error> {
        let device = self.registry.get(handle)?;
        if !self.fsm.is_idle() || !self.registry.may_start(handle) {
            return Err(Error::DeviceBusy);
        }
        device.check_ready(bytes_to_send, bytes_to_read)?;
        self.registry
            .get_mut(handle)?
            .prepare(bytes_to_send, bytes_to_read, repeated_start);
        self.start(handle);
        Ok(())
    }

    /// Queues a transfer for the round-robin scheduler.
    ///
    /// # Errors
    ///
    /// Same as [`Self::begin_transfer`], except that a busy bus is not an error.
    pub fn request_transfer(
        &mut self,
        handle: DeviceHandle,
        bytes_to_send: usize,
        bytes_to_read: usize,
        repeated_start: bool,
    ) -> Result<(), Error> {
        let device = self.registry.get_mut(handle)?;
        device.check_ready(bytes_to_send, bytes_to_read)?;
        device.prepare(bytes_to_send, bytes_to_read, repeated_start);
        device.state = DeviceState::Requested;
        Ok(())
    }

    /// Starts the next queued device if the bus is free.
    ///
    /// While a device holds the bus after a repeated start only that device is eligible.
    pub fn start_next(&mut self) -> Option<DeviceHandle> {
        if !self.fsm.is_idle() || self.registry.is_busy() {
            return None;
        }
        let handle = match self.registry.bus_owner() {
            Some(owner) => Some(owner).filter(|&owner| {
                self.registry
                    .get(owner)
                    .is_ok_and(|device| device.state() == DeviceState::Requested)
            }),
            None => self.registry.next_pending(),
        }?;
        self.logger
            .debug(format_args!("i2c: scheduling device {}", handle.index()));
        self.start(handle);
        Some(handle)
    }

    /// Ends the bus hold of `handle` with a STOP.
    ///
    /// A device that finished with a repeated start keeps the bus until its next transfer.
    /// This gives the bus back without one; the STOP completes over the following polls and
    /// the device's last result is left as it was. If the owner neither transfers nor
    /// releases, `poll` releases the bus on its own after `retry_budget × timer_period`
    /// ticks.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidDevice`] for an unknown handle
    /// * [`Error::DeviceBusy`] if another device holds the bus or a transaction is running
    pub fn release_bus(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        let in_progress = self.registry.get(handle)?.state() == DeviceState::InProgress;
        match self.registry.bus_owner() {
            None => Ok(()),
            Some(owner) if owner != handle => Err(Error::DeviceBusy),
            Some(_) if in_progress || !self.fsm.is_idle() => Err(Error::DeviceBusy),
            Some(_) => {
                self.run_release(handle);
                Ok(())
            }
        }
    }

    /// Advances the engine by one tick.
    ///
    /// Returns the handle of the device whose transaction ended during this call.
    pub fn poll(&mut self) -> Option<DeviceHandle> {
        let active = self.fsm.active.filter(|_| !self.releasing);
        match self.timer.tick() {
            Some(TimerEvent::RetryExhausted) if self.fsm.active.is_none() => {
                self.expire_hold();
                return None;
            }
            Some(TimerEvent::RetryExhausted) => {
                self.dispatch(Signal::RetryExhausted);
                return self.ended(active);
            }
            Some(TimerEvent::Timeout) if self.fsm.active.is_some() => {
                self.logger.warn(format_args!(
                    "i2c: timeout in {:?}, {} retries left",
                    self.fsm.state,
                    self.timer.retries_left()
                ));
                self.dispatch(Signal::Timeout);
            }
            Some(TimerEvent::Timeout) | None => {}
        }

        if self.fsm.is_idle() {
            if self.config.auto_schedule {
                self.start_next();
            }
            return None;
        }

        if let Some(signal) = self.fsm.status_shadow.synthesize(&mut self.hw) {
            self.dispatch(signal);
        }
        self.ended(active)
    }

    /// # Errors
    ///
    /// [`Error::InvalidDevice`] for an unknown handle.
    pub fn is_device_finished(&self, handle: DeviceHandle) -> Result<bool, Error> {
        Ok(self.registry.get(handle)?.is_finished())
    }

    /// Bytes moved so far by the current or last transfer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDevice`] for an unknown handle.
    pub fn transfer_counts(&self, handle: DeviceHandle) -> Result<TransferCounts, Error> {
        Ok(self.registry.get(handle)?.counts())
    }

    /// Result of the last transfer, `WouldBlock` until it has ended.
    pub fn transfer_result(&self, handle: DeviceHandle) -> nb::Result<TransferCounts, Error> {
        let device = self.registry.get(handle)?;
        if !device.is_finished() {
            return Err(nb::Error::WouldBlock);
        }
        match device.error() {
            Some(error) => Err(nb::Error::Other(error)),
            None => Ok(device.counts()),
        }
    }

    /// # Errors
    ///
    /// [`Error::InvalidDevice`] for an unknown handle.
    pub fn device_error(&self, handle: DeviceHandle) -> Result<Option<Error>, Error> {
        Ok(self.registry.get(handle)?.error())
    }

    /// # Errors
    ///
    /// [`Error::InvalidDevice`] for an unknown handle.
    pub fn device_state(&self, handle: DeviceHandle) -> Result<DeviceState, Error> {
        Ok(self.registry.get(handle)?.state())
    }

    /// Bytes received by the last transfer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDevice`] for an unknown handle.
    pub fn read_data(&self, handle: DeviceHandle) -> Result<&[u8], Error> {
        Ok(self.registry.get(handle)?.read_data())
    }

    /// # Errors
    ///
    /// [`Error::InvalidDevice`], or [`Error::DeviceBusy`] while the device is queued or on
    /// the bus.
    pub fn write_buffer_mut(&mut self, handle: DeviceHandle) -> Result<&mut [u8], Error> {
        self.registry.write_buffer_mut(handle)
    }

    /// Consumes the result of the last transfer so the device accepts a new one.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDevice`], or [`Error::DeviceBusy`] while the device is queued or on
    /// the bus.
    pub fn acknowledge(&mut self, handle: DeviceHandle) -> Result<(), Error> {
        let device = self.registry.get_mut(handle)?;
        if device.state() != DeviceState::Idle {
            return Err(Error::DeviceBusy);
        }
        device.acknowledge();
        Ok(())
    }

    /// `true` when no transaction runs and no device holds the bus.
    #[must_use]
    pub fn is_bus_idle(&self) -> bool {
        self.fsm.is_idle() && !self.registry.is_busy() && self.registry.bus_owner().is_none()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.fsm.state
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry<'a, N> {
        &self.registry
    }

    pub fn peripheral(&self) -> &P {
        &self.hw
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.hw
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    fn start(&mut self, handle: DeviceHandle) {
        if let Ok(device) = self.registry.get_mut(handle) {
            device.state = DeviceState::InProgress;
        }
        // drop the hold timeout, if any
        self.timer.disarm();
        self.registry.set_busy(true);
        self.fsm.active = Some(handle);
        self.dispatch(Signal::BeginTransfer);
    }

    fn run_release(&mut self, handle: DeviceHandle) {
        if let Ok(device) = self.registry.get_mut(handle) {
            device.repeated_start_issued = false;
        }
        self.timer.disarm();
        self.releasing = true;
        self.registry.set_busy(true);
        self.fsm.active = Some(handle);
        self.dispatch(Signal::ReleaseBus);
    }

    fn expire_hold(&mut self) {
        let Some(owner) = self.registry.bus_owner() else {
            return;
        };
        self.logger.warn(format_args!(
            "i2c: device {} held the bus too long, releasing",
            owner.index()
        ));
        self.run_release(owner);
    }

    fn ended(&self, active: Option<DeviceHandle>) -> Option<DeviceHandle> {
        active.filter(|_| self.fsm.active.is_none())
    }

    fn dispatch(&mut self, signal: Signal) {
        let Some(handle) = self.fsm.active else {
            return;
        };
        let state = self.fsm.state;
        let acknowledged = match (state, signal) {
            (State::WriteAddress | State::WriteData, Signal::BusIdle) => {
                self.hw.acknowledge_status()
            }
            _ => true,
        };
        let abort_on_nack = self.config.abort_on_nack;

        let Ok(device) = self.registry.get_mut(handle) else {
            self.releasing = false;
            self.free_bus(None);
            return;
        };
        let event = device.event(signal);
        let view = device.view(state, acknowledged, abort_on_nack);
        if signal == Signal::BeginTransfer {
            device.repeated_start_issued = false;
        }

        let step = transition(state, &event, &view);
        if step.is_stay(state) {
            if !acknowledged {
                self.logger.warn(format_args!(
                    "i2c: device {} not acknowledged in {:?}",
                    handle.index(),
                    state
                ));
            }
            return;
        }
        self.logger.debug(format_args!(
            "i2c: {:?} --{:?}--> {:?}",
            state, signal, step.next
        ));
        self.fsm.state = step.next;

        let mut held = false;
        for effect in step.effects.iter().copied() {
            match effect {
                Effect::MarkRepeatedStart => held = true,
                Effect::Finish => self.finish(handle, held),
                Effect::Abort(error) => self.abort(handle, state, error),
                _ => self.apply(handle, effect),
            }
        }
    }

    fn apply(&mut self, handle: DeviceHandle, effect: Effect) {
        match effect {
            Effect::IssueStart => {
                self.hw.issue_start();
                self.fsm.status_shadow.record(Action::Start);
            }
            Effect::IssueRestart => {
                self.hw.issue_restart();
                self.fsm.status_shadow.record(Action::Restart);
            }
            Effect::IssueStop => {
                self.hw.issue_stop();
                self.fsm.status_shadow.record(Action::Stop);
            }
            Effect::SendAck(ack) => {
                self.hw.send_ack(ack);
                self.fsm.status_shadow.record(Action::Ack);
            }
            Effect::Transmit(byte) => {
                self.hw.transmit_byte(byte);
                self.fsm.status_shadow.record(Action::Transmit);
            }
            Effect::EnableReceiver => {
                self.hw.enable_receiver();
                self.fsm.status_shadow.record(Action::Receive);
            }
            Effect::StoreReceived => {
                let byte = self.hw.received_byte();
                if let Ok(device) = self.registry.get_mut(handle) {
                    device.store_received(byte);
                }
            }
            Effect::AdvanceWrite => {
                if let Ok(device) = self.registry.get_mut(handle) {
                    device.advance_write();
                }
            }
            Effect::ArmTimer => self.timer.arm(),
            Effect::DisarmTimer => self.timer.disarm(),
            Effect::Fail(error) => {
                self.logger
                    .error(format_args!("i2c: device {}: {}", handle.index(), error));
                if let Ok(device) = self.registry.get_mut(handle) {
                    device.error = Some(error);
                }
            }
            Effect::MarkRepeatedStart | Effect::Finish | Effect::Abort(_) => {}
        }
    }

    fn finish(&mut self, handle: DeviceHandle, held: bool) {
        if core::mem::take(&mut self.releasing) {
            self.free_bus(None);
            self.logger
                .debug(format_args!("i2c: device {} released the bus", handle.index()));
            return;
        }
        if let Ok(device) = self.registry.get_mut(handle) {
            device.complete(None);
            if held {
                device.repeated_start_issued = true;
                device.generate_repeated_start = false;
            }
        }
        self.release(handle, held.then_some(handle));
        if held {
            // hold timeout
            self.timer.arm();
        }
        self.logger.debug(format_args!(
            "i2c: device {} finished{}",
            handle.index(),
            if held { ", bus held" } else { "" }
        ));
    }

    fn abort(&mut self, handle: DeviceHandle, from: State, error: Error) {
        if from == State::ReadData {
            self.hw.disable_receiver();
        }
        self.timer.reset();
        if core::mem::take(&mut self.releasing) {
            self.free_bus(None);
            self.logger.error(format_args!(
                "i2c: device {}: bus release failed: {}",
                handle.index(),
                error
            ));
            return;
        }
        if let Ok(device) = self.registry.get_mut(handle) {
            device.complete(Some(error));
            device.repeated_start_issued = false;
        }
        self.release(handle, None);
        self.logger.error(format_args!(
            "i2c: device {} aborted in {:?}: {}",
            handle.index(),
            from,
            error
        ));
    }

    fn release(&mut self, handle: DeviceHandle, owner: Option<DeviceHandle>) {
        self.free_bus(owner);
        self.registry.advance_past(handle);
    }

    fn free_bus(&mut self, owner: Option<DeviceHandle>) {
        self.fsm.reset();
        self.registry.set_bus_owner(owner);
        self.registry.set_busy(false);
    }
}
