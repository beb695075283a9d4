// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end run-loop scenarios that don't fit naturally as unit tests
//! inside a single module: boot broadcast, a recurring deferred function,
//! an idempotent flood, a lagging schedule, and an ISR-raised batch.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use manuvr_abi::{MsgDef, MsgFlags};
use manuvr_kernel::{CallbackDisposition, Config, Kernel, Message, Receiver, Schedule, StdPlatform};

struct FlagOnBoot {
    name: String,
    booted: Rc<Cell<bool>>,
}

impl Receiver for FlagOnBoot {
    fn receiver_name(&self) -> &str {
        &self.name
    }

    fn boot_complete(&mut self) {
        self.booted.set(true);
    }
}

#[test]
fn boot_broadcast_reaches_every_receiver_and_drains_the_queue() {
    let mut kernel = Kernel::new(StdPlatform::new(), Config::default());
    let flags: Vec<Rc<Cell<bool>>> = (0..3).map(|_| Rc::new(Cell::new(false))).collect();
    for (i, flag) in flags.iter().enumerate() {
        kernel.subscribe(
            Box::new(FlagOnBoot {
                name: format!("r{i}"),
                booted: flag.clone(),
            }),
            0,
        );
    }

    kernel.bootstrap();
    assert_eq!(kernel.exec_queue_len(), 1, "BOOT_COMPLETED should be queued, not yet dispatched");
    kernel.proc_idle_flags();

    assert!(flags.iter().all(|f| f.get()), "every receiver should have seen BOOT_COMPLETED");
    assert_eq!(kernel.exec_queue_len(), 0);
}

struct CountOnNotify {
    code: u16,
    count: Rc<Cell<u32>>,
}

impl Receiver for CountOnNotify {
    fn receiver_name(&self) -> &str {
        "counter"
    }

    fn notify(&mut self, msg: &Message) -> i8 {
        if msg.code == self.code {
            self.count.set(self.count.get() + 1);
        }
        1
    }

    fn callback_proc(&mut self, _msg: &Message) -> CallbackDisposition {
        CallbackDisposition::Reap
    }
}

#[test]
fn a_scheduled_legacy_callback_fires_without_broadcasting_to_subscribers() {
    const DEFERRED_FXN_CODE: u16 = 0x0017; // manuvr_abi::MsgCode::DeferredFxn
    let mut kernel = Kernel::new(StdPlatform::new(), Config::default());
    let notified = Rc::new(Cell::new(0u32));
    kernel.subscribe(Box::new(CountOnNotify { code: DEFERRED_FXN_CODE, count: notified.clone() }), 0);
    kernel.bootstrap();
    kernel.proc_idle_flags();

    let fired = Rc::new(Cell::new(0u32));
    let fired_in_callback = fired.clone();
    let mut msg = Message::new(DEFERRED_FXN_CODE);
    msg.schedule = Some(Schedule::new(5, 3, true).with_legacy_callback(move || {
        fired_in_callback.set(fired_in_callback.get() + 1);
    }));
    kernel.add_schedule(msg);

    for _ in 0..30 {
        kernel.advance_scheduler(1);
        kernel.proc_idle_flags();
    }

    assert_eq!(fired.get(), 4, "period 5 / recurrence 3 should fire 4 times over 30ms");
    assert_eq!(notified.get(), 0, "a legacy callback must run instead of broadcasting to subscribers");
    assert_eq!(kernel.schedule_queue_len(), 0, "auto-clear should have dropped the schedule");
}

#[test]
fn a_recurring_deferred_fxn_fires_exactly_recurrence_plus_one_times_then_clears() {
    const DEFERRED_FXN_CODE: u16 = 0x0017; // manuvr_abi::MsgCode::DeferredFxn
    let mut kernel = Kernel::new(StdPlatform::new(), Config::default());
    let count = Rc::new(Cell::new(0));
    let receiver_id = kernel.subscribe(
        Box::new(CountOnNotify { code: DEFERRED_FXN_CODE, count: count.clone() }),
        0,
    );
    kernel.bootstrap();
    kernel.proc_idle_flags(); // drain BOOT_COMPLETED so it can't be confused with the fxn below

    let mut msg = Message::new(DEFERRED_FXN_CODE).with_originator(receiver_id);
    msg.schedule = Some(Schedule::new(5, 3, true));
    kernel.add_schedule(msg);

    for _ in 0..30 {
        kernel.advance_scheduler(1);
        kernel.proc_idle_flags();
    }

    assert_eq!(count.get(), 4, "period 5 / recurrence 3 should fire 4 times over 30ms");
    assert_eq!(kernel.schedule_queue_len(), 0, "auto-clear should have dropped the schedule");
}

#[test]
fn flooding_an_idempotent_code_leaves_exactly_one_dispatch() {
    const FLOOD_CODE: u16 = 0x1010;
    let mut kernel = Kernel::new(StdPlatform::new(), Config::default());
    kernel.register_message(MsgDef::new(FLOOD_CODE, MsgFlags::IDEMPOTENT, "FLOOD_TEST"));
    let count = Rc::new(Cell::new(0));
    kernel.subscribe(Box::new(CountOnNotify { code: FLOOD_CODE, count: count.clone() }), 0);
    kernel.bootstrap();
    kernel.proc_idle_flags();

    let mut denials = 0u32;
    for _ in 0..1000 {
        if kernel.raise_event(FLOOD_CODE, None).is_err() {
            denials += 1;
        }
    }
    assert_eq!(denials, 999);
    assert_eq!(kernel.counters().insertion_denials, 999);

    kernel.proc_idle_flags();
    kernel.proc_idle_flags();
    assert_eq!(count.get(), 1, "only one of the 1000 raises should ever have been dispatched");
}

#[test]
fn a_badly_lagging_schedule_fires_once_and_counts_the_lag() {
    let mut kernel = Kernel::new(StdPlatform::new(), Config::default());
    let count = Rc::new(Cell::new(0));
    let receiver_id = kernel.subscribe(
        Box::new(CountOnNotify { code: 0x1011, count: count.clone() }),
        0,
    );
    kernel.register_message(MsgDef::new(0x1011, MsgFlags::empty(), "TICK"));
    kernel.bootstrap();
    kernel.proc_idle_flags();

    let mut msg = Message::new(0x1011).with_originator(receiver_id);
    msg.schedule = Some(Schedule::new(10, -1, false));
    kernel.add_schedule(msg);

    kernel.advance_scheduler(250);
    kernel.proc_idle_flags();

    assert_eq!(count.get(), 1, "a 25x-lagged tick must still fire exactly once");
    assert_eq!(kernel.counters().lagged_schedules, 1);
}

struct RecordOrder {
    seen: Rc<RefCell<Vec<u16>>>,
}

impl Receiver for RecordOrder {
    fn receiver_name(&self) -> &str {
        "recorder"
    }

    fn notify(&mut self, msg: &Message) -> i8 {
        self.seen.borrow_mut().push(msg.code);
        1
    }
}

#[test]
fn isr_raised_messages_survive_in_priority_then_fifo_order() {
    let mut kernel = Kernel::new(StdPlatform::new(), Config::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    kernel.subscribe(Box::new(RecordOrder { seen: seen.clone() }), 0);
    for code in [0x1101u16, 0x1102, 0x1103] {
        kernel.register_message(MsgDef::new(code, MsgFlags::empty(), "ISR_CODE"));
    }
    kernel.bootstrap();
    kernel.proc_idle_flags();

    // Simulates an interrupt handler firing mid-loop: three Messages raised
    // back to back, with a tie in priority between the first and last.
    kernel.isr_raise_event(Message::new(0x1101).with_priority(5)).unwrap();
    kernel.isr_raise_event(Message::new(0x1102).with_priority(10)).unwrap();
    kernel.isr_raise_event(Message::new(0x1103).with_priority(5)).unwrap();

    kernel.proc_idle_flags();

    assert_eq!(*seen.borrow(), vec![0x1102, 0x1101, 0x1103]);
}
