// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The porting seam for the wire itself, per spec.md §4.5's note that actual
//! hardware access is out of scope but the seam for it is not. Mirrors
//! `manuvr-kernel`'s `Platform` split: `BusAdapter` never touches hardware
//! registers directly, so a future embedded port only has to supply a new
//! impl of [`I2cBus`].

use manuvr_abi::BusFault;
use std::collections::HashMap;

/// A blocking I2C bus. `BusOp::advance` calls through this one byte-buffer
/// transfer at a time; a real port would back this with the target's HAL.
pub trait I2cBus {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), BusFault>;
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), BusFault>;
}

/// What a [`MockI2cBus`] does when addressed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MockResponse {
    /// Acks and echoes back whatever was last written to this address.
    Ack,
    /// NACKs every transfer, as an absent device would.
    Nack,
}

/// A bus with no wires attached, for tests and the demo binary. Addresses
/// not explicitly configured NACK, matching a real bus with nothing plugged
/// into that slot.
#[derive(Default)]
pub struct MockI2cBus {
    responses: HashMap<u8, MockResponse>,
    last_write: HashMap<u8, Vec<u8>>,
}

impl MockI2cBus {
    pub fn new() -> Self {
        MockI2cBus::default()
    }

    /// Declares how `addr` responds to transfers from here on.
    pub fn set_response(&mut self, addr: u8, response: MockResponse) {
        self.responses.insert(addr, response);
    }

    fn response_for(&self, addr: u8) -> MockResponse {
        *self.responses.get(&addr).unwrap_or(&MockResponse::Nack)
    }
}

impl I2cBus for MockI2cBus {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), BusFault> {
        match self.response_for(addr) {
            MockResponse::Ack => {
                self.last_write.insert(addr, bytes.to_vec());
                Ok(())
            }
            MockResponse::Nack => Err(BusFault::BusFault),
        }
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        match self.response_for(addr) {
            MockResponse::Ack => {
                let echo = self.last_write.get(&addr).cloned().unwrap_or_default();
                for (slot, byte) in buf.iter_mut().zip(echo.iter().chain(std::iter::repeat(&0))) {
                    *slot = *byte;
                }
                Ok(())
            }
            MockResponse::Nack => Err(BusFault::BusFault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_address_nacks() {
        let mut bus = MockI2cBus::new();
        assert_eq!(bus.write(0x42, &[1]), Err(BusFault::BusFault));
    }

    #[test]
    fn configured_address_echoes_last_write() {
        let mut bus = MockI2cBus::new();
        bus.set_response(0x27, MockResponse::Ack);
        bus.write(0x27, &[0xAA, 0xBB]).unwrap();
        let mut buf = [0u8; 2];
        bus.read(0x27, &mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xBB]);
    }
}
