// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dispatch engine: subscriber registry, three queues, preallocation
//! pool, timer wheel, call-ahead/back registries and profiler (spec.md
//! §4.4). Per spec.md §9, there is no `Kernel::INSTANCE` global: every
//! producer holds an explicit `&mut Kernel` (or, for `isr_raise_event` and
//! `advance_scheduler`, a `&Kernel`/`Arc<Kernel>` shared across threads).

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::{debug, warn};
use manuvr_abi::{MsgCode, MsgDef, MsgFlags};

use crate::config::Config;
use crate::message::{Message, MessageFlags, MessageId, Ownership, ReceiverId, ScheduleTick};
use crate::platform::{Millis, Platform};
use crate::receiver::{CallbackDisposition, Receiver};

/// Validation failures from `validate_insertion`, spec.md §4.4.1. The
/// original returns small negative integers from C; `code()` reproduces
/// those exact values for anything that logs them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValidationError {
    /// Unreachable in safe Rust (there is no null `Message`); kept so this
    /// enum mirrors the original error taxonomy one-for-one.
    NullMessage,
    UndefinedCode,
    DuplicateInsertion,
    IdempotencyBlocked,
}

impl ValidationError {
    pub const fn code(self) -> i8 {
        match self {
            ValidationError::NullMessage => -1,
            ValidationError::UndefinedCode => -2,
            ValidationError::DuplicateInsertion => -3,
            ValidationError::IdempotencyBlocked => -4,
        }
    }
}

/// A function-pointer-style listener registered against a message code,
/// run before (call-ahead) or after (call-back) broadcast. A non-zero
/// return counts as activity (spec.md §4.4.5).
pub type Listener = Box<dyn FnMut(&Message) -> i8>;

#[derive(Default, Clone, Copy, Debug)]
struct ProfileRecord {
    executions: u64,
    last: Millis,
    best: Millis,
    worst: Millis,
    total: Millis,
}

impl ProfileRecord {
    fn observe(&mut self, elapsed: Millis) {
        self.executions += 1;
        self.last = elapsed;
        self.best = if self.executions == 1 { elapsed } else { self.best.min(elapsed) };
        self.worst = self.worst.max(elapsed);
        self.total += elapsed;
    }

    fn average(&self) -> Millis {
        if self.executions == 0 {
            0
        } else {
            self.total / self.executions
        }
    }
}

/// Kernel-wide counters, spec.md §4.4.6.
#[derive(Default, Clone, Copy, Debug)]
pub struct Counters {
    pub total_loops: u64,
    pub total_events: u64,
    pub dead_events: u64,
    pub queue_depth_max: usize,
    pub idle_loop_count: u64,
    pub insertion_denials: u64,
    pub prealloc_starved: u64,
    pub lagged_schedules: u64,
    pub delivery_errors: u64,
}

struct Slot {
    receiver: Box<dyn Receiver>,
    priority: i32,
}

/// The dispatch engine. Generic over `Platform` so a hosted build and a
/// future embedded port share this file untouched (spec.md §9's
/// `with_interrupts_masked` design note).
pub struct Kernel<P: Platform> {
    platform: P,
    config: Config,
    registry: HashMap<u16, MsgDef>,

    subscribers: Vec<Option<Slot>>,
    dispatch_order: Vec<usize>,
    booted: bool,

    exec_queue: Vec<Message>,
    isr_queue: Mutex<VecDeque<Message>>,
    schedule_queue: Vec<Message>,
    prealloc_pool: Vec<Message>,

    sched_accumulator: Mutex<Millis>,
    skip_latch: AtomicBool,
    skips_observed: u32,

    ca_listeners: HashMap<u16, Vec<Listener>>,
    cb_listeners: HashMap<u16, Vec<Listener>>,

    profiler_enabled: bool,
    profiles: HashMap<u16, ProfileRecord>,

    idle_streak: u32,
    counters: Counters,
}

impl<P: Platform> Kernel<P> {
    pub fn new(platform: P, config: Config) -> Self {
        Kernel {
            platform,
            config,
            registry: seed_builtin_registry(),
            subscribers: Vec::new(),
            dispatch_order: Vec::new(),
            booted: false,
            exec_queue: Vec::new(),
            isr_queue: Mutex::new(VecDeque::new()),
            schedule_queue: Vec::new(),
            prealloc_pool: Vec::new(),
            sched_accumulator: Mutex::new(0),
            skip_latch: AtomicBool::new(false),
            skips_observed: 0,
            ca_listeners: HashMap::new(),
            cb_listeners: HashMap::new(),
            profiler_enabled: false,
            profiles: HashMap::new(),
            idle_streak: 0,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn register_message(&mut self, def: MsgDef) {
        self.registry.insert(def.code, def);
    }

    // -- Subscription (spec.md §4.4.1) --------------------------------

    pub fn subscribe(&mut self, receiver: Box<dyn Receiver>, priority: i32) -> ReceiverId {
        let idx = self.subscribers.len();
        self.subscribers.push(Some(Slot { receiver, priority }));
        self.dispatch_order.push(idx);
        let subscribers = &self.subscribers;
        self.dispatch_order.sort_by(|&a, &b| {
            let pa = subscribers[a].as_ref().map(|s| s.priority).unwrap_or(i32::MIN);
            let pb = subscribers[b].as_ref().map(|s| s.priority).unwrap_or(i32::MIN);
            pb.cmp(&pa)
        });
        if self.booted {
            if let Some(slot) = self.subscribers[idx].as_mut() {
                slot.receiver.attached();
            }
        }
        ReceiverId(idx)
    }

    pub fn unsubscribe(&mut self, id: ReceiverId) {
        if let Some(slot) = self.subscribers.get_mut(id.0) {
            *slot = None;
        }
        self.dispatch_order.retain(|&i| i != id.0);
    }

    pub fn register_call_ahead(&mut self, code: u16, listener: Listener) {
        self.ca_listeners.entry(code).or_default().push(listener);
    }

    pub fn register_call_back(&mut self, code: u16, listener: Listener) {
        self.cb_listeners.entry(code).or_default().push(listener);
    }

    // -- Boot -----------------------------------------------------------

    /// Seeds the preallocation pool, runs `attached()` on every subscriber
    /// registered so far, and raises `BOOT_COMPLETED`. `BOOT_COMPLETED`
    /// must only ever be raised here; a second manual raise would re-fire
    /// every receiver's `boot_complete()` hook.
    pub fn bootstrap(&mut self) {
        for _ in 0..self.config.prealloc_pool_size {
            let mut msg = Message::new(0);
            msg.flags |= MessageFlags::PREALLOCATED;
            self.prealloc_pool.push(msg);
        }
        for slot in self.subscribers.iter_mut().flatten() {
            slot.receiver.attached();
        }
        self.booted = true;
        let _ = self.raise_event(MsgCode::BootCompleted.code(), None);
    }

    // -- Intake (spec.md §4.4.1) -----------------------------------------

    pub fn raise_event(
        &mut self,
        code: u16,
        originator: Option<ReceiverId>,
    ) -> Result<MessageId, ValidationError> {
        let mut msg = self.take_from_pool_or_alloc(code);
        msg.originator = originator;
        self.static_raise_event(msg)
    }

    pub fn static_raise_event(&mut self, msg: Message) -> Result<MessageId, ValidationError> {
        if let Err(e) = self.validate_insertion(&msg) {
            self.counters.insertion_denials += 1;
            self.reclaim_rejected(msg);
            return Err(e);
        }
        let id = msg.id();
        self.exec_queue.push(msg);
        self.counters.queue_depth_max = self.counters.queue_depth_max.max(self.exec_queue.len());
        Ok(id)
    }

    /// Inserts `msg` from interrupt/IO-thread context. Only rejects on
    /// undefined code or a duplicate already sitting in the ISR queue
    /// itself; full idempotency/duplicate-against-exec-queue checks happen
    /// when the ISR queue is drained on the dispatch thread.
    pub fn isr_raise_event(&self, msg: Message) -> Result<(), ValidationError> {
        if msg.code == 0 {
            return Err(ValidationError::UndefinedCode);
        }
        self.platform.with_interrupts_masked(|| {
            let mut q = self.isr_queue.lock().expect("isr queue poisoned");
            if q.iter().any(|m| m.id() == msg.id()) {
                Err(ValidationError::DuplicateInsertion)
            } else {
                q.push_back(msg);
                Ok(())
            }
        })
    }

    pub fn validate_insertion(&self, msg: &Message) -> Result<(), ValidationError> {
        if msg.code == 0 {
            return Err(ValidationError::UndefinedCode);
        }
        if self.exec_queue.iter().any(|m| m.id() == msg.id()) {
            return Err(ValidationError::DuplicateInsertion);
        }
        if let Some(def) = self.registry.get(&msg.code) {
            if def.flags.contains(MsgFlags::IDEMPOTENT)
                && self.exec_queue.iter().any(|m| m.code == msg.code)
            {
                return Err(ValidationError::IdempotencyBlocked);
            }
        }
        Ok(())
    }

    fn take_from_pool_or_alloc(&mut self, code: u16) -> Message {
        if let Some(mut msg) = self.prealloc_pool.pop() {
            msg.repurpose(code, None);
            msg
        } else {
            self.counters.prealloc_starved += 1;
            Message::new(code)
        }
    }

    fn reclaim_rejected(&mut self, msg: Message) {
        self.reclaim(msg, CallbackDisposition::Undefined);
    }

    // -- Scheduler (spec.md §4.4.3) --------------------------------------

    /// May be called from any context, including interrupts. Only touches
    /// an accumulator and a bistable skip latch.
    pub fn advance_scheduler(&self, ms: Millis) {
        let mut acc = self.sched_accumulator.lock().expect("accumulator poisoned");
        if *acc > 0 {
            self.skip_latch.store(true, Ordering::SeqCst);
        }
        *acc += ms;
    }

    pub fn add_schedule(&mut self, msg: Message) -> MessageId {
        let id = msg.id();
        self.schedule_queue.push(msg);
        id
    }

    pub fn remove_schedule(&mut self, id: MessageId) {
        for msg in self.schedule_queue.iter_mut() {
            if msg.id() == id {
                if let Some(s) = msg.schedule.as_mut() {
                    s.removed = true;
                }
            }
        }
    }

    fn service_schedules(&mut self) {
        let ms_elapsed = {
            let mut acc = self.sched_accumulator.lock().expect("accumulator poisoned");
            std::mem::replace(&mut *acc, 0)
        };
        let was_skipped = self.skip_latch.swap(false, Ordering::SeqCst);
        if was_skipped {
            self.skips_observed += 1;
            if self.skips_observed > self.config.max_sequential_skips && self.config.skip_failsafe {
                warn!("scheduler skip-storm ({} consecutive); requesting reboot", self.skips_observed);
                self.platform.reboot();
            }
        } else {
            self.skips_observed = 0;
        }

        if ms_elapsed == 0 {
            return;
        }

        let mut fired = Vec::new();
        let mut keep = Vec::with_capacity(self.schedule_queue.len());
        for mut msg in std::mem::take(&mut self.schedule_queue) {
            let tick = {
                let sched = msg
                    .schedule
                    .as_mut()
                    .expect("schedule queue entries always carry a Schedule");
                let (tick, lagged) = sched.apply_time(ms_elapsed);
                if lagged {
                    self.counters.lagged_schedules += 1;
                }
                tick
            };
            match tick {
                ScheduleTick::NoOp => keep.push(msg),
                ScheduleTick::FireAndRetain => {
                    fired.push(msg.fire_copy());
                    keep.push(msg);
                }
                ScheduleTick::FireAndDrop => {
                    fired.push(msg.fire_copy());
                }
                ScheduleTick::DropWithoutFire => {}
            }
        }
        self.schedule_queue = keep;
        for msg in fired {
            let _ = self.static_raise_event(msg);
        }
    }

    // -- Run loop (spec.md §4.4.2) ----------------------------------------

    /// Runs one pass: services schedules, drains the ISR queue, then
    /// dispatches Messages off the execute queue up to the configured
    /// budget. Returns the number of Messages dispatched this pass.
    pub fn proc_idle_flags(&mut self) -> usize {
        self.service_schedules();
        self.drain_isr_queue();

        let budget = self.config.event_budget();
        let mut processed = 0;
        while !self.exec_queue.is_empty() && processed < budget {
            let msg = self.pop_highest_priority();
            self.dispatch_one(msg);
            processed += 1;
        }

        self.counters.total_loops += 1;
        if processed == 0 {
            self.idle_streak += 1;
            if self.idle_streak >= self.config.max_idle_count {
                self.counters.idle_loop_count += 1;
                self.platform.idle_hook();
            }
        } else {
            self.idle_streak = 0;
        }
        processed
    }

    fn drain_isr_queue(&mut self) {
        let drained: Vec<Message> = {
            let mut q = self.isr_queue.lock().expect("isr queue poisoned");
            q.drain(..).collect()
        };
        for msg in drained {
            let _ = self.static_raise_event(msg);
        }
    }

    fn pop_highest_priority(&mut self) -> Message {
        let mut best = 0;
        for i in 1..self.exec_queue.len() {
            if self.exec_queue[i].priority > self.exec_queue[best].priority {
                best = i;
            }
        }
        self.exec_queue.remove(best)
    }

    fn dispatch_one(&mut self, mut msg: Message) {
        let start = self.platform.now_ms();
        let mut activity = false;

        if let Some(listeners) = self.ca_listeners.get_mut(&msg.code) {
            for listener in listeners.iter_mut() {
                if listener(&msg) != 0 {
                    activity = true;
                }
            }
        }

        if msg.is_single_target() {
            // A legacy callback or a specific target makes this Message
            // "single-target" (the original's `singleTarget()`): it runs
            // through `execute()` instead of the subscriber broadcast below.
            let slot = msg.specific_target.and_then(|id| self.subscribers.get_mut(id.0)).and_then(Option::as_mut);
            if execute_single_target(&mut msg, slot) != 0 {
                activity = true;
            }
        } else {
            for &idx in &self.dispatch_order {
                if let Some(slot) = self.subscribers.get_mut(idx).and_then(Option::as_mut) {
                    if deliver(slot, &msg) != 0 {
                        activity = true;
                    }
                }
            }
        }

        if let Some(listeners) = self.cb_listeners.get_mut(&msg.code) {
            for listener in listeners.iter_mut() {
                if listener(&msg) != 0 {
                    activity = true;
                }
            }
        }

        let elapsed = self.platform.now_ms().saturating_sub(start);
        if self.profiler_enabled {
            self.profiles.entry(msg.code).or_default().observe(elapsed);
        }

        let disposition = match msg.originator {
            Some(oid) => match self.subscribers.get_mut(oid.0).and_then(Option::as_mut) {
                Some(slot) => catch_unwind(AssertUnwindSafe(|| slot.receiver.callback_proc(&msg)))
                    .unwrap_or(CallbackDisposition::Error),
                None => CallbackDisposition::Undefined,
            },
            None => CallbackDisposition::Undefined,
        };

        if !activity {
            self.counters.dead_events += 1;
        }
        self.counters.total_events += 1;

        match disposition {
            CallbackDisposition::Recycle => {
                let _ = self.static_raise_event(msg);
            }
            other => self.reclaim(msg, other),
        }
    }

    /// The single reclaim function spec.md §9 asks for: disposition from the
    /// originator's callback can force the issue (`Recycle`/`Reap`/`Drop`);
    /// anything else falls back to the Message's own [`Ownership`].
    fn reclaim(&mut self, mut msg: Message, disposition: CallbackDisposition) {
        match disposition {
            CallbackDisposition::Drop => return,
            CallbackDisposition::Reap => return,
            CallbackDisposition::Recycle => {
                msg.args.clear();
                if self.prealloc_pool.len() < self.config.prealloc_pool_size {
                    self.prealloc_pool.push(msg);
                }
                return;
            }
            CallbackDisposition::Error => self.counters.delivery_errors += 1,
            CallbackDisposition::Undefined => {}
        }
        match msg.ownership() {
            Ownership::Borrowed | Ownership::Scheduled(_) => {}
            Ownership::Pooled => {
                msg.args.clear();
                if self.prealloc_pool.len() < self.config.prealloc_pool_size {
                    self.prealloc_pool.push(msg);
                }
            }
            Ownership::Owned => {}
        }
    }

    // -- Profiling (spec.md §4.4.6) ---------------------------------------

    pub fn set_profiler_enabled(&mut self, enabled: bool) {
        self.profiler_enabled = enabled;
        self.profiles.clear();
    }

    pub fn profile_average_ms(&self, code: u16) -> Option<Millis> {
        self.profiles.get(&code).map(ProfileRecord::average)
    }

    /// Share of run-loop passes that did useful work, out of the passes
    /// seen since boot. An approximation of the original's `cpu_usage()`:
    /// this implementation doesn't track busy-vs-idle wall time directly,
    /// only pass counts, so this is a duty-cycle figure rather than a true
    /// CPU percentage.
    pub fn cpu_usage_percent(&self) -> f32 {
        if self.counters.total_loops == 0 {
            return 0.0;
        }
        let idle = self.counters.idle_loop_count.min(self.counters.total_loops);
        100.0 * (1.0 - idle as f32 / self.counters.total_loops as f32)
    }

    // -- Debug dump (spec.md §4.3's `printDebug`, generalized) -------------

    /// A human-readable one-shot dump of queue depths, counters, and every
    /// attached receiver's own `print_debug` output — the Rust stand-in for
    /// the original's `printDebug`/`printScheduler`/`printPlatformInfo`
    /// trio, which all ultimately wrote to the same console buffer.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "exec={} isr={} sched={} pool={} nonce={:#010x}\n",
            self.exec_queue.len(),
            self.isr_queue.lock().map(|q| q.len()).unwrap_or(0),
            self.schedule_queue.len(),
            self.prealloc_pool.len(),
            self.platform.random_u32(),
        ));
        out.push_str(&format!("{:?}\n", self.counters));
        for slot in self.subscribers.iter().flatten() {
            slot.receiver.print_debug(&mut out);
        }
        out
    }

    // -- Cancellation (spec.md §5) ----------------------------------------

    /// Removes `id` from the execute queue (if present) or marks its
    /// schedule for removal (if it's a schedule template). No effect if
    /// `id` is the Message currently being dispatched, or found in neither
    /// place.
    pub fn abort(&mut self, id: MessageId) -> bool {
        if let Some(pos) = self.exec_queue.iter().position(|m| m.id() == id) {
            self.exec_queue.remove(pos);
            return true;
        }
        for msg in self.schedule_queue.iter_mut() {
            if msg.id() == id {
                if let Some(s) = msg.schedule.as_mut() {
                    s.removed = true;
                }
                return true;
            }
        }
        debug!("abort: message {id:?} not found in either queue");
        false
    }

    pub fn exec_queue_len(&self) -> usize {
        self.exec_queue.len()
    }

    pub fn schedule_queue_len(&self) -> usize {
        self.schedule_queue.len()
    }

    pub fn prealloc_pool_len(&self) -> usize {
        self.prealloc_pool.len()
    }
}

/// Delivers `msg` to one subscriber, returning its raw `notify` result
/// (spec.md §4.3: `0` = no action, `>0` = acted, `<0` = error). A negative
/// result also dumps this receiver's debug state and local log, per §4.4.2
/// step 3b.
fn deliver(slot: &mut Slot, msg: &Message) -> i8 {
    let result = catch_unwind(AssertUnwindSafe(|| slot.receiver.notify(msg))).unwrap_or_else(|_| {
        warn!("receiver panicked while handling code {:#06x}", msg.code);
        -1
    });
    if result < 0 {
        let mut dump = String::new();
        slot.receiver.print_debug(&mut dump);
        let local_log = slot.receiver.flush_local_log();
        warn!(
            "{} reported an error handling code {:#06x}\n{}{}",
            slot.receiver.receiver_name(),
            msg.code,
            dump,
            local_log
        );
    }
    if msg.code == MsgCode::BootCompleted.code() {
        slot.receiver.boot_complete();
    }
    result
}

/// Runs `msg.execute`, containing panics the same way [`deliver`] does and
/// dumping the target's (if any) debug state and local log on a negative
/// result (spec.md §4.2, §4.4.2 step 3b).
fn execute_single_target(msg: &mut Message, mut slot: Option<&mut Slot>) -> i8 {
    let code = msg.code;
    let result = catch_unwind(AssertUnwindSafe(|| {
        let receiver = match &mut slot {
            Some(s) => Some(&mut *s.receiver as &mut dyn Receiver),
            None => None,
        };
        msg.execute(receiver)
    }))
    .unwrap_or_else(|_| {
        warn!("single-target execute panicked while handling code {code:#06x}");
        -1
    });
    if result < 0 {
        match slot {
            Some(slot) => {
                let mut dump = String::new();
                slot.receiver.print_debug(&mut dump);
                let local_log = slot.receiver.flush_local_log();
                warn!(
                    "{} reported an error executing code {code:#06x}\n{}{}",
                    slot.receiver.receiver_name(),
                    dump,
                    local_log
                );
            }
            None => warn!("legacy callback reported an error executing code {code:#06x}"),
        }
    }
    result
}

/// Seeds the process-wide registry with the core's built-in message codes
/// (spec.md §6). Forms and flags are deliberately minimal: built-ins carry
/// no payload grammar of their own in this implementation, and the codes
/// that matter for the testable properties (idempotency, exportability) are
/// flagged accordingly.
fn seed_builtin_registry() -> HashMap<u16, MsgDef> {
    let mut reg = HashMap::new();
    let entries: &[(MsgCode, MsgFlags)] = &[
        (MsgCode::BootCompleted, MsgFlags::empty()),
        (MsgCode::SysReboot, MsgFlags::EXPORTABLE),
        (MsgCode::SysShutdown, MsgFlags::EXPORTABLE),
        (MsgCode::SysBootloader, MsgFlags::EXPORTABLE),
        (MsgCode::SysConfLoad, MsgFlags::EXPORTABLE),
        (MsgCode::SysConfSave, MsgFlags::EXPORTABLE),
        (MsgCode::LegendMessages, MsgFlags::EXPORTABLE),
        (MsgCode::SelfDescribe, MsgFlags::EXPORTABLE),
        (MsgCode::Subscribe, MsgFlags::EXPORTABLE),
        (MsgCode::XportSend, MsgFlags::EXPORTABLE | MsgFlags::EMITS),
        (MsgCode::XportReceive, MsgFlags::EXPORTABLE | MsgFlags::LISTENS),
        (MsgCode::XportQueueReady, MsgFlags::empty()),
        (MsgCode::XportCbQueueReady, MsgFlags::empty()),
        (MsgCode::DeferredFxn, MsgFlags::empty()),
        (MsgCode::SchedulerEnableByPid, MsgFlags::empty()),
        (MsgCode::SchedulerDisableByPid, MsgFlags::empty()),
        (MsgCode::SchedulerProfilerStart, MsgFlags::empty()),
        (MsgCode::SchedulerProfilerStop, MsgFlags::empty()),
        (MsgCode::SchedulerProfilerDump, MsgFlags::EXPORTABLE),
    ];
    for (code, flags) in entries {
        reg.insert(code.code(), MsgDef::new(code.code(), *flags, code.label()));
    }
    reg
}
