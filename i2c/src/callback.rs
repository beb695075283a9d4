// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The owning-receiver hooks a queued [`crate::BusOp`] flows through, per
//! spec.md §4.5. Kept separate from `manuvr_kernel::Receiver` so this crate
//! doesn't have to depend on the generic `Kernel<P>` just to describe the
//! shape of a bus-op owner; the demo binary is what implements both traits
//! on the same type and bridges completions into the kernel's queues.

use crate::op::BusOp;

pub trait BusOpCallback {
    /// Runs before an op is admitted to the work queue. A non-zero return
    /// vetoes it; the op is failed with [`manuvr_abi::BusFault::Invalid`]
    /// and never touches the bus.
    fn io_op_callahead(&mut self, _op: &BusOp) -> i8 {
        0
    }

    /// Runs once an op reaches `Complete` or `Fault`.
    fn io_op_callback(&mut self, _op: &BusOp) -> i8 {
        0
    }
}
