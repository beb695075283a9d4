// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The I2C bus driver spec.md §4.5 describes: a porting seam for the wire,
//! a transfer state machine, and the adapter that queues and dispatches
//! transfers against it.

pub mod adapter;
pub mod bus;
pub mod callback;
pub mod op;

pub use adapter::{BusAdapter, BusFlags, FinishedOp, PingResult, PING_MAP_LEN};
pub use bus::{I2cBus, MockI2cBus, MockResponse};
pub use callback::BusOpCallback;
pub use op::{BusOp, BusOpcode, BusOpState};
