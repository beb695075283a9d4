// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared wire types for the kernel's message substrate.
//!
//! This crate is deliberately independent of `manuvr-kernel` and `manuvr-i2c`
//! so that an out-of-tree driver or transport (the things spec.md §1 keeps
//! external) can depend on just the wire format without pulling in the
//! scheduler.

pub mod arg;
pub mod codes;
pub mod fault;
pub mod legend;
pub mod tag;

pub use arg::{Argument, ArgError};
pub use codes::MsgCode;
pub use fault::BusFault;
pub use legend::{MsgDef, MsgFlags};
pub use tag::TypeTag;
