// Licensed under the Apache-2.0 license

//! Simulated bus peripheral for unit tests.
//!
//! Every command is recorded in [`MockPeripheral::ops`]. An action stays "in progress" for
//! `latency` status samples and then completes; with zero latency it is already done at the
//! next sample, so the status bit is never seen high.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::i2c::status::{Action, BusStatus};
use crate::i2c::traits::{I2cHardwareCore, I2cMasterCommands};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Start,
    Stop,
    Restart,
    Ack(bool),
    Transmit(u8),
    EnableReceiver,
    DisableReceiver,
}

#[derive(Default)]
pub(crate) struct MockPeripheral {
    pub(crate) ops: Vec<Op>,
    slaves: Vec<u8>,
    rx_data: VecDeque<u8>,
    nack_data_at: Option<usize>,
    stall: bool,
    latency: u32,
    tx_lag: u32,
    inflight: Option<(Action, u32)>,
    ack: bool,
    expecting_address: bool,
    data_index: usize,
    tx_full_for: u32,
    rx_byte: Option<u8>,
}

impl MockPeripheral {
    /// Bus with the given 7-bit slave addresses answering.
    pub(crate) fn with_slaves(slaves: &[u8]) -> Self {
        Self {
            slaves: slaves.to_vec(),
            ..Default::default()
        }
    }

    /// Bytes the slaves shift out, in order. Once exhausted reads never complete.
    pub(crate) fn receiving(mut self, data: &[u8]) -> Self {
        self.rx_data.extend(data.iter().copied());
        self
    }

    /// NACK the data byte at `index` (counted across the whole test).
    pub(crate) fn nack_data_at(mut self, index: usize) -> Self {
        self.nack_data_at = Some(index);
        self
    }

    /// No action ever completes.
    pub(crate) fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    pub(crate) fn latency(mut self, samples: u32) -> Self {
        self.latency = samples;
        self
    }

    /// Samples the transmit register stays full after the byte left the shifter.
    pub(crate) fn tx_lag(mut self, samples: u32) -> Self {
        self.tx_lag = samples;
        self
    }

    fn begin(&mut self, op: Op, action: Action) {
        self.ops.push(op);
        self.inflight = Some((action, self.latency));
    }

    fn complete(&mut self, action: Action) {
        match action {
            Action::Transmit => self.tx_full_for = self.tx_lag,
            Action::Receive => self.rx_byte = self.rx_data.pop_front(),
            _ => {}
        }
    }
}

impl I2cHardwareCore for MockPeripheral {
    fn status(&mut self) -> BusStatus {
        let mut status = BusStatus::default();
        let Some((action, remaining)) = self.inflight else {
            return status;
        };
        if !self.stall && remaining == 0 {
            self.inflight = None;
            self.complete(action);
            return status;
        }
        if !self.stall {
            self.inflight = Some((action, remaining - 1));
        }
        match action {
            Action::Start => status.start = true,
            Action::Restart => status.restart = true,
            Action::Stop => status.stop = true,
            Action::Ack => status.ack = true,
            Action::Transmit => status.transmit = true,
            Action::Receive => status.receive = true,
        }
        status
    }

    fn acknowledge_status(&mut self) -> bool {
        self.ack
    }

    fn is_transmit_register_full(&mut self) -> bool {
        if self.tx_full_for > 0 {
            self.tx_full_for -= 1;
            true
        } else {
            false
        }
    }

    fn is_received_data_available(&mut self) -> bool {
        self.rx_byte.is_some()
    }

    fn received_byte(&mut self) -> u8 {
        self.rx_byte.take().unwrap_or(0xff)
    }
}

impl I2cMasterCommands for MockPeripheral {
    fn issue_start(&mut self) {
        self.expecting_address = true;
        self.begin(Op::Start, Action::Start);
    }

    fn issue_stop(&mut self) {
        self.begin(Op::Stop, Action::Stop);
    }

    fn issue_restart(&mut self) {
        self.expecting_address = true;
        self.begin(Op::Restart, Action::Restart);
    }

    fn send_ack(&mut self, ack: bool) {
        self.begin(Op::Ack(ack), Action::Ack);
    }

    fn transmit_byte(&mut self, byte: u8) {
        if self.expecting_address {
            self.expecting_address = false;
            self.ack = self.slaves.contains(&(byte >> 1));
        } else {
            self.ack = self.nack_data_at != Some(self.data_index);
            self.data_index += 1;
        }
        self.begin(Op::Transmit(byte), Action::Transmit);
    }

    fn enable_receiver(&mut self) {
        self.begin(Op::EnableReceiver, Action::Receive);
    }

    fn disable_receiver(&mut self) {
        self.ops.push(Op::DisableReceiver);
        self.inflight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_latency_completes_on_first_sample() {
        let mut mock = MockPeripheral::with_slaves(&[0x50]);
        mock.issue_start();

        assert_eq!(mock.status(), BusStatus::default());
        assert_eq!(mock.ops, [Op::Start]);
    }

    #[test]
    fn test_latency_keeps_bit_high() {
        let mut mock = MockPeripheral::with_slaves(&[0x50]).latency(2);
        mock.issue_stop();

        assert!(mock.status().stop);
        assert!(mock.status().stop);
        assert!(!mock.status().stop);
    }

    #[test]
    fn test_address_ack_follows_slave_list() {
        let mut mock = MockPeripheral::with_slaves(&[0x50]);
        mock.issue_start();
        mock.transmit_byte(0xa0);
        assert!(mock.acknowledge_status());

        mock.issue_restart();
        mock.transmit_byte(0xa2);
        assert!(!mock.acknowledge_status());
    }

    #[test]
    fn test_receive_without_data_never_ready() {
        let mut mock = MockPeripheral::with_slaves(&[0x50]);
        mock.enable_receiver();

        assert!(!mock.status().receive);
        assert!(!mock.is_received_data_available());
    }
}
