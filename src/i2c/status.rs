// Licensed under the Apache-2.0 license

//! Edge detection on the peripheral status bits.
//!
//! The peripheral clears its "in progress" bits as soon as an action finishes, often before
//! the next poll can see the 0 -> 1 -> 0 pulse. Instead of watching for the pulse, the engine
//! keeps a shadow of the actions it started itself and treats "shadow set, live bit low" as
//! completion.

use crate::i2c::fsm::Signal;
use crate::i2c::traits::I2cHardwareCore;

/// Live "action in progress" bits as read from the peripheral.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStatus {
    pub start: bool,
    pub restart: bool,
    pub stop: bool,
    pub ack: bool,
    pub transmit: bool,
    pub receive: bool,
}

/// Bus action the engine can start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Start,
    Restart,
    Stop,
    Ack,
    Transmit,
    Receive,
}

/// Actions started by the engine and not yet seen completing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusShadow {
    pub start: bool,
    pub restart: bool,
    pub stop: bool,
    pub ack: bool,
    pub transmit: bool,
    pub receive: bool,
}

impl StatusShadow {
    /// Records that `action` was just started.
    pub fn record(&mut self, action: Action) {
        match action {
            Action::Start => self.start = true,
            Action::Restart => self.restart = true,
            Action::Stop => self.stop = true,
            Action::Ack => self.ack = true,
            Action::Transmit => self.transmit = true,
            Action::Receive => self.receive = true,
        }
    }

    /// `true` if nothing is outstanding.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Samples the peripheral once and returns at most one completion signal.
    ///
    /// The shadow bit of the reported action is cleared; other completions stay pending
    /// and are reported by later calls.
    pub fn synthesize<H: I2cHardwareCore>(&mut self, hw: &mut H) -> Option<Signal> {
        if self.is_clear() {
            return None;
        }
        let live = hw.status();

        if self.start && !live.start {
            self.start = false;
            return Some(Signal::BusIdle);
        }
        if self.restart && !live.restart {
            self.restart = false;
            return Some(Signal::BusIdle);
        }
        if self.stop && !live.stop {
            self.stop = false;
            return Some(Signal::BusIdle);
        }
        if self.ack && !live.ack {
            self.ack = false;
            return Some(Signal::AckReceived);
        }
        // shift-complete and holding-register-empty can be a baud period apart
        if self.transmit && !live.transmit && !hw.is_transmit_register_full() {
            self.transmit = false;
            return Some(Signal::BusIdle);
        }
        if self.receive && !live.receive && hw.is_received_data_available() {
            self.receive = false;
            return Some(Signal::DataReceived);
        }
        None
    }
}
