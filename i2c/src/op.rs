// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `BusOp`: one transfer's state machine, per spec.md §4.5.

use manuvr_abi::BusFault;
use manuvr_kernel::ReceiverId;

/// What a [`BusOp`] asks the bus to do.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusOpcode {
    /// Write `buffer` to the target.
    Tx,
    /// Read `buffer.len()` bytes from the target into `buffer`.
    Rx,
    /// Write with no data payload, used for single-command devices.
    TxCmd,
    /// Zero-length write, used only to test whether a device acks its
    /// address. `buffer` is ignored.
    Ping,
}

/// Where a [`BusOp`] sits in its own state machine. Transfers move strictly
/// left to right; a fault can only be reached from `Addr` or `Io`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusOpState {
    Initiate,
    Addr,
    Io,
    Complete,
    Fault,
}

/// One queued transfer. The adapter's work queue holds these; `advance`
/// drives one step of the state machine against a live [`crate::I2cBus`].
pub struct BusOp {
    pub opcode: BusOpcode,
    pub target_addr: u8,
    pub sub_addr: Option<u8>,
    pub buffer: Vec<u8>,
    pub state: BusOpState,
    pub fault: BusFault,
    pub callback: Option<ReceiverId>,
    pub priority: i32,
    pub verbosity: u8,
    sub_addr_sent: bool,
}

impl BusOp {
    pub fn new(
        opcode: BusOpcode,
        target_addr: u8,
        sub_addr: Option<u8>,
        buffer: Vec<u8>,
        callback: Option<ReceiverId>,
    ) -> Self {
        BusOp {
            opcode,
            target_addr,
            sub_addr,
            buffer,
            state: BusOpState::Initiate,
            fault: BusFault::NoError,
            callback,
            priority: 0,
            verbosity: 0,
            sub_addr_sent: false,
        }
    }

    /// Re-initializes a pooled `BusOp` in place, the way `Message::repurpose`
    /// does for its pool.
    pub(crate) fn reset(
        &mut self,
        opcode: BusOpcode,
        target_addr: u8,
        sub_addr: Option<u8>,
        buffer: Vec<u8>,
        callback: Option<ReceiverId>,
    ) {
        self.opcode = opcode;
        self.target_addr = target_addr;
        self.sub_addr = sub_addr;
        self.buffer = buffer;
        self.state = BusOpState::Initiate;
        self.fault = BusFault::NoError;
        self.callback = callback;
        self.priority = 0;
        self.verbosity = 0;
        self.sub_addr_sent = false;
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, BusOpState::Complete | BusOpState::Fault)
    }

    pub fn succeeded(&self) -> bool {
        self.state == BusOpState::Complete
    }

    fn fail(&mut self, fault: BusFault) {
        self.fault = fault;
        self.state = BusOpState::Fault;
    }

    /// Drives one state transition against `bus`. A single call to
    /// `advance` performs at most one bus transfer, so the adapter's work
    /// queue can interleave ops from several in-flight transfers instead of
    /// blocking the whole bus on one op end to end.
    pub fn advance(&mut self, bus: &mut dyn crate::I2cBus) {
        match self.state {
            BusOpState::Initiate => {
                self.state = BusOpState::Addr;
            }
            BusOpState::Addr => {
                if let Some(sub) = self.sub_addr {
                    if !self.sub_addr_sent {
                        if let Err(fault) = bus.write(self.target_addr, &[sub]) {
                            self.fail(fault);
                            return;
                        }
                        self.sub_addr_sent = true;
                    }
                }
                self.state = BusOpState::Io;
            }
            BusOpState::Io => {
                let result = match self.opcode {
                    BusOpcode::Tx | BusOpcode::TxCmd => bus.write(self.target_addr, &self.buffer),
                    BusOpcode::Rx => bus.read(self.target_addr, &mut self.buffer),
                    BusOpcode::Ping => bus.write(self.target_addr, &[]),
                };
                match result {
                    Ok(()) => self.state = BusOpState::Complete,
                    Err(fault) => self.fail(fault),
                }
            }
            BusOpState::Complete | BusOpState::Fault => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockI2cBus, MockResponse};

    fn run_to_completion(op: &mut BusOp, bus: &mut dyn crate::I2cBus) {
        while !op.is_finished() {
            op.advance(bus);
        }
    }

    #[test]
    fn tx_against_an_acking_device_completes() {
        let mut bus = MockI2cBus::new();
        bus.set_response(0x27, MockResponse::Ack);
        let mut op = BusOp::new(BusOpcode::Tx, 0x27, None, vec![1, 2, 3], None);
        run_to_completion(&mut op, &mut bus);
        assert!(op.succeeded());
        assert_eq!(op.fault, BusFault::NoError);
    }

    #[test]
    fn tx_against_an_absent_device_faults() {
        let mut bus = MockI2cBus::new();
        let mut op = BusOp::new(BusOpcode::Tx, 0x42, None, vec![1], None);
        run_to_completion(&mut op, &mut bus);
        assert_eq!(op.state, BusOpState::Fault);
        assert_eq!(op.fault, BusFault::BusFault);
    }

    #[test]
    fn sub_address_is_sent_exactly_once_before_the_payload() {
        let mut bus = MockI2cBus::new();
        bus.set_response(0x50, MockResponse::Ack);
        let mut op = BusOp::new(BusOpcode::Rx, 0x50, Some(0x10), vec![0; 2], None);
        run_to_completion(&mut op, &mut bus);
        assert!(op.succeeded());
    }
}
