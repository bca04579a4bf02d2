// Licensed under the Apache-2.0 license

//! Transaction state machine.
//!
//! [`transition`] is a pure function of the current state, the incoming event and a small
//! view of the active transfer. It returns the next state plus the list of [`Effect`]s the
//! engine must apply (bus commands, cursor updates, timer control). Keeping it pure lets the
//! whole protocol be checked without a peripheral.
//!
//! ```text
//!  Idle --BEGIN--> Start --idle--> WriteAddress --ack/read--> ReadData
//!   ^  \__(restart already issued)__^   |  \--ack/write--> WriteData
//!   |                                   nack                  |
//!   +---- Stop <------------------------+---------------------+
//!   +---- Restart <-- (repeated start requested / read follows)
//!
//!  Idle --RELEASE--> Stop --idle--> Idle     (bus held after a repeated start)
//! ```

use heapless::Vec;

use crate::i2c::common::Error;
use crate::i2c::registry::DeviceHandle;
use crate::i2c::status::StatusShadow;

/// Protocol states. `Idle` is both the initial state and the terminal return state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Idle,
    Start,
    WriteAddress,
    WriteData,
    Restart,
    Stop,
    ReadData,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    BeginTransfer,
    /// The last START/RESTART/STOP or byte transmission completed.
    BusIdle,
    /// The master ACK/NACK sequence after a received byte completed.
    AckReceived,
    DataReceived,
    Timeout,
    RetryExhausted,
    /// Give up a bus held after a repeated start.
    ReleaseBus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionEvent {
    pub signal: Signal,
    /// Address byte with the R/W bit already encoded.
    pub slave_address: u8,
    pub master_read: bool,
    pub generate_repeated_start: bool,
    pub repeated_start_already_issued: bool,
}

/// What the state machine needs to know about the active transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferView {
    /// Acknowledge bit of the last transmitted byte.
    pub acknowledged: bool,
    /// Byte to transmit once the one in flight is acknowledged.
    pub next_write: Option<u8>,
    /// Bytes still to be received, counting the one about to be stored.
    pub read_remaining: usize,
    /// A read phase follows the write phase in the same transaction.
    pub read_follows: bool,
    pub abort_on_nack: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Effect {
    IssueStart,
    IssueRestart,
    IssueStop,
    SendAck(bool),
    Transmit(u8),
    EnableReceiver,
    /// Move the received byte into the read buffer.
    StoreReceived,
    /// The byte in flight was acknowledged.
    AdvanceWrite,
    ArmTimer,
    DisarmTimer,
    /// Record an error; the transaction still ends through STOP.
    Fail(Error),
    /// The device may skip START on its next transfer.
    MarkRepeatedStart,
    /// Transaction ended normally (or through STOP after `Fail`).
    Finish,
    /// Transaction dropped without a bus condition.
    Abort(Error),
}

const MAX_EFFECTS: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub next: State,
    pub effects: Vec<Effect, MAX_EFFECTS>,
}

impl Step {
    fn to(next: State) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        let pushed = self.effects.push(effect).is_ok();
        debug_assert!(pushed, "effect list overflow");
        self
    }

    /// `true` if the event was not consumed.
    #[must_use]
    pub fn is_stay(&self, from: State) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

/// Computes the next state and the effects for `event` in `state`.
#[must_use]
pub fn transition(state: State, event: &TransactionEvent, view: &TransferView) -> Step {
    match (state, event.signal) {
        (State::Idle, Signal::RetryExhausted) => Step::to(State::Idle),
        (_, Signal::RetryExhausted) => {
            Step::to(State::Idle).with(Effect::Abort(Error::RetryExhausted))
        }
        // informational: only exhaustion aborts
        (_, Signal::Timeout) => Step::to(state),

        (State::Idle, Signal::ReleaseBus) => Step::to(State::Stop)
            .with(Effect::IssueStop)
            .with(Effect::ArmTimer),

        (State::Idle, Signal::BeginTransfer) => {
            if event.repeated_start_already_issued {
                Step::to(State::WriteAddress)
                    .with(Effect::Transmit(event.slave_address))
                    .with(Effect::ArmTimer)
            } else {
                Step::to(State::Start)
                    .with(Effect::IssueStart)
                    .with(Effect::ArmTimer)
            }
        }

        (State::Start, Signal::BusIdle) => Step::to(State::WriteAddress)
            .with(Effect::DisarmTimer)
            .with(Effect::Transmit(event.slave_address))
            .with(Effect::ArmTimer),

        (State::WriteAddress, Signal::BusIdle) => {
            if !view.acknowledged {
                return nack(state, Error::AddressNack, view);
            }
            let step = Step::to(state).with(Effect::DisarmTimer);
            if event.master_read {
                Step {
                    next: State::ReadData,
                    ..step
                }
                .with(Effect::EnableReceiver)
                .with(Effect::ArmTimer)
            } else if let Some(byte) = view.next_write {
                Step {
                    next: State::WriteData,
                    ..step
                }
                .with(Effect::Transmit(byte))
                .with(Effect::ArmTimer)
            } else {
                // address-only write, e.g. a presence check
                end_segment(step, event, view.read_follows)
            }
        }

        (State::WriteData, Signal::BusIdle) => {
            if !view.acknowledged {
                return nack(state, Error::DataNack, view);
            }
            let step = Step::to(state)
                .with(Effect::DisarmTimer)
                .with(Effect::AdvanceWrite);
            match view.next_write {
                Some(byte) => step.with(Effect::Transmit(byte)).with(Effect::ArmTimer),
                None => end_segment(step, event, view.read_follows),
            }
        }

        (State::Restart, Signal::BusIdle) => {
            if event.master_read && view.read_remaining > 0 {
                // write phase done, switch direction on the held bus
                Step::to(State::WriteAddress)
                    .with(Effect::DisarmTimer)
                    .with(Effect::Transmit(event.slave_address))
                    .with(Effect::ArmTimer)
            } else {
                Step::to(State::Idle)
                    .with(Effect::DisarmTimer)
                    .with(Effect::MarkRepeatedStart)
                    .with(Effect::Finish)
            }
        }

        (State::Stop, Signal::BusIdle) => Step::to(State::Idle)
            .with(Effect::DisarmTimer)
            .with(Effect::Finish),

        (State::ReadData, Signal::DataReceived) => Step::to(State::ReadData)
            .with(Effect::DisarmTimer)
            .with(Effect::StoreReceived)
            .with(Effect::SendAck(view.read_remaining > 1))
            .with(Effect::ArmTimer),

        (State::ReadData, Signal::AckReceived | Signal::BusIdle) => {
            let step = Step::to(state).with(Effect::DisarmTimer);
            if view.read_remaining > 0 {
                step.with(Effect::EnableReceiver).with(Effect::ArmTimer)
            } else {
                end_segment(step, event, false)
            }
        }

        _ => Step::to(state),
    }
}

/// Last byte of a phase done: restart into the read phase, restart on request, or stop.
fn end_segment(step: Step, event: &TransactionEvent, read_follows: bool) -> Step {
    if read_follows || event.generate_repeated_start {
        Step {
            next: State::Restart,
            ..step
        }
        .with(Effect::IssueRestart)
        .with(Effect::ArmTimer)
    } else {
        Step {
            next: State::Stop,
            ..step
        }
        .with(Effect::IssueStop)
        .with(Effect::ArmTimer)
    }
}

fn nack(state: State, error: Error, view: &TransferView) -> Step {
    if !view.abort_on_nack {
        // left for the retry timer to abort
        return Step::to(state);
    }
    Step::to(State::Stop)
        .with(Effect::DisarmTimer)
        .with(Effect::Fail(error))
        .with(Effect::IssueStop)
        .with(Effect::ArmTimer)
}

/// The one state machine bound to the peripheral.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionFsm {
    pub state: State,
    pub status_shadow: StatusShadow,
    pub active: Option<DeviceHandle>,
}

impl TransactionFsm {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Idle,
            status_shadow: StatusShadow {
                start: false,
                restart: false,
                stop: false,
                ack: false,
                transmit: false,
                receive: false,
            },
            active: None,
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Drops the active binding and any outstanding actions.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
