// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A toy I2C temperature sensor, wired up as both a `Receiver` (so the
//! kernel can deliver it I2C completion events) and a `BusOpCallback` (so
//! the bus adapter can veto/notify it directly).

use log::info;
use manuvr_i2c::{BusOp, BusOpCallback, BusOpState};
use manuvr_kernel::{CallbackDisposition, Message, Receiver};

pub struct TempSensor {
    name: String,
    pub addr: u8,
    pub last_reading: Option<u8>,
    pub faults: u32,
}

impl TempSensor {
    pub fn new(name: impl Into<String>, addr: u8) -> Self {
        TempSensor {
            name: name.into(),
            addr,
            last_reading: None,
            faults: 0,
        }
    }
}

impl Receiver for TempSensor {
    fn receiver_name(&self) -> &str {
        &self.name
    }

    fn notify(&mut self, msg: &Message) -> i8 {
        info!("{}: observed code {:#06x}", self.name, msg.code);
        1
    }

    fn callback_proc(&mut self, _msg: &Message) -> CallbackDisposition {
        CallbackDisposition::Recycle
    }
}

impl BusOpCallback for TempSensor {
    fn io_op_callback(&mut self, op: &BusOp) -> i8 {
        match op.state {
            BusOpState::Complete => {
                self.last_reading = op.buffer.first().copied();
                info!(
                    "{}: read {:?} from 0x{:02x}",
                    self.name, self.last_reading, self.addr
                );
            }
            BusOpState::Fault => {
                self.faults += 1;
                info!("{}: bus fault ({:?}) at 0x{:02x}", self.name, op.fault, self.addr);
            }
            _ => {}
        }
        0
    }
}
