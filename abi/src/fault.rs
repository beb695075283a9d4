// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! I2C bus fault taxonomy, spec.md §6. Shared between `manuvr-i2c` and
//! anything downstream that inspects a completed `BusOp`.

use std::fmt;

/// The closed set of I2C bus fault codes a `BusOp` may complete with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BusFault {
    NoError = 0,
    BusFault = 1,
    NotFound = 2,
    Exists = 3,
    Collision = 4,
    Insertion = 5,
    AssignClob = 6,
    Invalid = 7,
    UndefdReg = 8,
    RegIsRo = 9,
}

impl BusFault {
    pub const fn is_error(self) -> bool {
        !matches!(self, BusFault::NoError)
    }
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BusFault::NoError => "nominal",
            BusFault::BusFault => "low-level bus signalling error",
            BusFault::NotFound => "slave absent at the probed address",
            BusFault::Exists => "slave re-add of existing address",
            BusFault::Collision => "address collides with already-attached slave",
            BusFault::Insertion => "slave attach failed",
            BusFault::AssignClob => "assigning to this slave would overwrite an existing bus",
            BusFault::Invalid => "slave inappropriate for this op",
            BusFault::UndefdReg => "register addressed is not in the slave's map",
            BusFault::RegIsRo => "write attempted to a read-only register",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for BusFault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_error_is_the_only_non_error() {
        assert!(!BusFault::NoError.is_error());
        assert!(BusFault::BusFault.is_error());
        assert!(BusFault::NotFound.is_error());
    }
}
