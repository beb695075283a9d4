// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Message` (the teacher's source calls it `ManuvrRunnable`), its schedule
//! state, and the grammar-matching parser from spec.md §4.2.1.
//!
//! Per spec.md §9's design notes, the three interacting ownership booleans
//! (`mem_managed`, `preallocated`, `scheduled`) of the original are
//! re-expressed as a single [`Ownership`] enum consumed by one
//! [`Ownership`]-driven reclaim decision in `Kernel::reclaim`; and the
//! "same pointer twice" duplicate-insertion check becomes an equality check
//! on [`MessageId`] rather than a raw pointer compare.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use manuvr_abi::{ArgError, Argument, MsgDef, TypeTag};

use crate::platform::Millis;
use crate::receiver::Receiver;

/// Identifies a [`Message`] independent of any particular clone of it.
/// Stands in for the original's pointer-identity check: two `Message`s with
/// the same id are "the same message" for duplicate-insertion purposes even
/// if one is a `Clone` of the other (as happens under the copy-on-fire
/// scheduler, see [`Schedule`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl MessageId {
    fn fresh() -> Self {
        MessageId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Index into the Kernel's subscriber table. `Message` never borrows a
/// receiver directly; routing is always done by the Kernel looking this up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(pub usize);

bitflags! {
    /// Per-message lifecycle flags, spec.md §3.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MessageFlags: u16 {
        const MEM_MANAGED_EXTERNALLY = 0b0000_0001;
        const PREALLOCATED           = 0b0000_0010;
        const AUTOCLEAR              = 0b0000_0100;
        const SCHEDULED              = 0b0000_1000;
        const PENDING_EXEC           = 0b0001_0000;
        const THREAD_ENABLED         = 0b0010_0000;
    }
}

/// What happens to a `Message` once the Kernel is done with it, replacing
/// the original's three interacting booleans (spec.md §9). There is a
/// single, homogeneous preallocation pool, so `Pooled` carries no slot
/// identity — unlike `Scheduled`, which does need to name which schedule
/// still holds a reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Ownership {
    /// Caller keeps the only handle the Kernel should care about; Kernel
    /// never frees or pools it.
    Borrowed,
    /// Belongs to the preallocation pool.
    Pooled,
    /// Owned by an active schedule; will run again.
    Scheduled(MessageId),
    /// No other owner; the Kernel destroys it at end-of-life.
    Owned,
}

/// Outcome of ticking a [`Schedule`] by some elapsed time, spec.md §4.2's
/// `applyTime`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleTick {
    /// Not due yet, or currently disabled.
    NoOp,
    /// Due: fire the message, schedule continues (possibly now disabled,
    /// if recurrence just reached zero with auto-clear off).
    FireAndRetain,
    /// Due, recurrence exhausted, auto-clear set: fire once more and then
    /// the schedule is removed entirely.
    FireAndDrop,
    /// The schedule was marked for removal before this tick ran; no firing,
    /// caller should drop it from the schedule queue.
    DropWithoutFire,
}

/// The recurring-timer half of a [`Message`], spec.md §4.2 and §4.4.3.
pub struct Schedule {
    pub period_ms: Millis,
    pub time_to_wait: Millis,
    /// -1 means "forever"; otherwise the remaining fire count.
    pub recurrence: i32,
    pub auto_clear: bool,
    pub enabled: bool,
    /// Forces an immediate fire on the next tick regardless of `time_to_wait`,
    /// set when a disabled schedule is re-enabled (spec.md §4.2).
    pub pending_fire: bool,
    /// Set by `Kernel::remove_schedule` when called from within the
    /// currently-firing handler; deferred here rather than mutating the
    /// schedule queue mid-traversal (spec.md §5 "Cancellation / timeouts").
    pub removed: bool,
    /// The original's legacy `schedule_callback`: a function run by
    /// `Message::execute` in place of the subscriber broadcast, for
    /// scheduled work with no `Receiver` of its own (spec.md §3, §4.2).
    pub legacy_callback: Option<Box<dyn FnMut() + Send>>,
}

impl Schedule {
    pub fn new(period_ms: Millis, recurrence: i32, auto_clear: bool) -> Self {
        Schedule {
            period_ms,
            time_to_wait: period_ms,
            recurrence,
            auto_clear,
            enabled: true,
            pending_fire: false,
            removed: false,
            legacy_callback: None,
        }
    }

    /// Attaches a legacy callback, routing this schedule's Messages through
    /// `Message::execute` instead of the subscriber broadcast (spec.md §4.2).
    pub fn with_legacy_callback(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.legacy_callback = Some(Box::new(callback));
        self
    }

    pub fn enable(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.pending_fire = true;
        }
        self.enabled = enabled;
    }

    pub fn delay(&mut self, ms: Millis) {
        self.time_to_wait = self.time_to_wait.saturating_add(ms);
    }

    pub fn alter_period(&mut self, period_ms: Millis) {
        self.period_ms = period_ms;
    }

    pub fn alter_recurrence(&mut self, recurrence: i32) {
        self.recurrence = recurrence;
    }

    /// Advances this schedule by `ms_elapsed` milliseconds. Returns the
    /// action the Kernel should take and whether this tick observed tick
    /// source lag (for the kernel-wide `lagged_schedules` counter).
    pub fn apply_time(&mut self, ms_elapsed: Millis) -> (ScheduleTick, bool) {
        if self.removed {
            return (ScheduleTick::DropWithoutFire, false);
        }
        if !self.enabled {
            return (ScheduleTick::NoOp, false);
        }
        if self.time_to_wait > ms_elapsed && !self.pending_fire {
            self.time_to_wait -= ms_elapsed;
            return (ScheduleTick::NoOp, false);
        }

        let overslip = ms_elapsed.saturating_sub(self.time_to_wait);
        let (new_ttw, lagged) = if overslip > self.period_ms {
            (self.period_ms, true)
        } else {
            (self.period_ms - overslip, false)
        };
        self.time_to_wait = new_ttw;
        self.pending_fire = false;

        if self.recurrence != -1 {
            self.recurrence -= 1;
        }

        if self.recurrence == 0 {
            if self.auto_clear {
                (ScheduleTick::FireAndDrop, lagged)
            } else {
                self.enabled = false;
                (ScheduleTick::FireAndRetain, lagged)
            }
        } else {
            (ScheduleTick::FireAndRetain, lagged)
        }
    }
}

impl Clone for Schedule {
    /// A legacy callback is a boxed closure, not a value that can be
    /// duplicated; a cloned Schedule carries no callback of its own. In
    /// practice this never matters: `Message::fire_copy`, the scheduler's
    /// only caller of `Clone` on a scheduled Message, already drops the
    /// whole schedule rather than cloning it.
    fn clone(&self) -> Self {
        Schedule {
            period_ms: self.period_ms,
            time_to_wait: self.time_to_wait,
            recurrence: self.recurrence,
            auto_clear: self.auto_clear,
            enabled: self.enabled,
            pending_fire: self.pending_fire,
            removed: self.removed,
            legacy_callback: None,
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("period_ms", &self.period_ms)
            .field("time_to_wait", &self.time_to_wait)
            .field("recurrence", &self.recurrence)
            .field("auto_clear", &self.auto_clear)
            .field("enabled", &self.enabled)
            .field("pending_fire", &self.pending_fire)
            .field("removed", &self.removed)
            .field("legacy_callback", &self.legacy_callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// The unit that flows through the Kernel (spec.md §3, §4.2).
#[derive(Clone, Debug)]
pub struct Message {
    id: MessageId,
    pub code: u16,
    pub args: Vec<Argument>,
    pub priority: i32,
    pub originator: Option<ReceiverId>,
    pub specific_target: Option<ReceiverId>,
    pub flags: MessageFlags,
    pub schedule: Option<Schedule>,
    pub refcount: u32,
}

impl Message {
    pub fn new(code: u16) -> Self {
        Message {
            id: MessageId::fresh(),
            code,
            args: Vec::new(),
            priority: 0,
            originator: None,
            specific_target: None,
            flags: MessageFlags::empty(),
            schedule: None,
            refcount: 0,
        }
    }

    pub fn with_originator(mut self, originator: ReceiverId) -> Self {
        self.originator = Some(originator);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: ReceiverId) -> Self {
        self.specific_target = Some(target);
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    /// This Message's end-of-life ownership, derived from its flags
    /// (spec.md §9's `Ownership` design note). `Kernel::reclaim` is the only
    /// consumer.
    pub fn ownership(&self) -> Ownership {
        if self.flags.contains(MessageFlags::MEM_MANAGED_EXTERNALLY) {
            Ownership::Borrowed
        } else if self.flags.contains(MessageFlags::SCHEDULED) {
            Ownership::Scheduled(self.id)
        } else if self.flags.contains(MessageFlags::PREALLOCATED) {
            Ownership::Pooled
        } else {
            Ownership::Owned
        }
    }

    /// Resets this Message to carry a new code (and optionally a new
    /// originator) while keeping memory-class flags intact, so a
    /// preallocated or scheduled Message can be handed back out without a
    /// fresh allocation.
    pub fn repurpose(&mut self, code: u16, originator: Option<ReceiverId>) {
        let keep = self.flags & (MessageFlags::PREALLOCATED | MessageFlags::SCHEDULED);
        self.id = MessageId::fresh();
        self.code = code;
        self.args.clear();
        self.priority = 0;
        self.originator = originator;
        self.specific_target = None;
        self.flags = keep;
        self.schedule = None;
        self.refcount = 0;
    }

    /// Clones this Message's identity, code, priority and originator into a
    /// fresh, unscheduled Message — the "copy-on-fire" behavior spec.md §9
    /// permits the scheduler to use instead of re-inserting a shared
    /// pointer into the execute queue.
    pub fn fire_copy(&self) -> Message {
        Message {
            id: MessageId::fresh(),
            code: self.code,
            args: self.args.clone(),
            priority: self.priority,
            originator: self.originator,
            specific_target: self.specific_target,
            flags: self.flags & !(MessageFlags::PREALLOCATED | MessageFlags::SCHEDULED),
            schedule: None,
            refcount: 0,
        }
    }

    pub fn add_arg(&mut self, arg: Argument) -> &mut Argument {
        self.args.push(arg);
        self.args.last_mut().expect("just pushed")
    }

    pub fn get_arg_as(&self, idx: usize, want: TypeTag) -> Result<&Argument, ArgAccessError> {
        let arg = self.args.get(idx).ok_or(ArgAccessError::OutOfRange)?;
        if arg.tag() != want {
            return Err(ArgAccessError::TypeMismatch {
                want,
                have: arg.tag(),
            });
        }
        Ok(arg)
    }

    /// Removes and returns the first argument matching `want` (spec.md
    /// §4.2's destructive-read accessor).
    pub fn consume_arg_as(&mut self, want: TypeTag) -> Option<Argument> {
        let pos = self.args.iter().position(|a| a.tag() == want)?;
        Some(self.args.remove(pos))
    }

    /// Parses `bytes` into this message's argument list using `forms`, per
    /// spec.md §4.2.1. Replaces any existing arguments on success.
    pub fn inflate_arguments_from_buffer(
        &mut self,
        forms: &[Vec<TypeTag>],
        bytes: &[u8],
    ) -> Result<(), GrammarError> {
        let form = match_form(forms, bytes.len())?;
        let mut args = Vec::with_capacity(form.len());
        let mut pos = 0;
        for (i, tag) in form.iter().enumerate() {
            let meta = tag.meta();
            let take = if i == form.len() - 1 && meta.variable_length {
                bytes.len() - pos
            } else {
                meta.fixed_size
            };
            if pos + take > bytes.len() {
                return Err(GrammarError::NoMatch);
            }
            let arg = Argument::from_wire(*tag, &bytes[pos..pos + take])
                .map_err(GrammarError::BadArgument)?;
            args.push(arg);
            pos += take;
        }
        self.args = args;
        Ok(())
    }

    /// Emits every argument's raw (grammar-known) wire form in order.
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<(), ArgError> {
        for arg in &self.args {
            arg.serialize_raw(out)?;
        }
        Ok(())
    }

    /// Runs this Message directly instead of broadcasting it to every
    /// subscriber, when it is "single-target" in the original's sense: a
    /// scheduled legacy callback takes priority if one is set (it ran
    /// before schedules ever carried a `specific_target`, so the original
    /// checks it first), otherwise `target` — the Kernel's resolution of
    /// `specific_target`, if any — is notified (spec.md §4.2, §4.4.2 step
    /// 3b). Returns `0` if neither applied.
    pub fn execute(&mut self, target: Option<&mut dyn Receiver>) -> i8 {
        if let Some(callback) = self.schedule.as_mut().and_then(|s| s.legacy_callback.as_mut()) {
            callback();
            return 1;
        }
        match target {
            Some(receiver) => receiver.notify(self),
            None => 0,
        }
    }

    /// Whether this Message should be routed through `execute` rather than
    /// broadcast to every subscriber (spec.md §4.4.2 step 3b).
    pub fn is_single_target(&self) -> bool {
        self.has_legacy_callback() || self.specific_target.is_some()
    }

    fn has_legacy_callback(&self) -> bool {
        self.schedule.as_ref().is_some_and(|s| s.legacy_callback.is_some())
    }
}

/// Failure modes of [`Message::get_arg_as`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArgAccessError {
    OutOfRange,
    TypeMismatch { want: TypeTag, have: TypeTag },
}

/// Failure modes of [`Message::inflate_arguments_from_buffer`] and
/// [`match_form`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GrammarError {
    /// No registered form matches the buffer length.
    NoMatch,
    /// More than one registered form matches; the schema is ambiguous.
    Ambiguous,
    /// A form matched but a component argument failed to parse.
    BadArgument(ArgError),
}

/// Selects the single grammatical form (from a message definition's
/// registered forms) that matches an inbound buffer of length `len`,
/// per spec.md §4.2.1. Exactly one candidate must match.
pub fn match_form(forms: &[Vec<TypeTag>], len: usize) -> Result<&Vec<TypeTag>, GrammarError> {
    let mut candidates = forms.iter().filter(|form| {
        let min_len = MsgDef::form_min_len(form);
        min_len == len || (min_len < len && form.iter().any(|t| t.meta().variable_length))
    });
    let first = candidates.next().ok_or(GrammarError::NoMatch)?;
    if candidates.next().is_some() {
        return Err(GrammarError::Ambiguous);
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn repurpose_keeps_memory_class_flags_and_drops_the_rest() {
        let mut msg = Message::new(1);
        msg.flags |= MessageFlags::PREALLOCATED | MessageFlags::PENDING_EXEC;
        msg.add_arg(Argument::uint8(9));
        let original_id = msg.id();
        msg.repurpose(2, None);
        assert_ne!(msg.id(), original_id);
        assert_eq!(msg.code, 2);
        assert!(msg.args.is_empty());
        assert!(msg.flags.contains(MessageFlags::PREALLOCATED));
        assert!(!msg.flags.contains(MessageFlags::PENDING_EXEC));
    }

    #[test]
    fn fire_copy_has_a_distinct_id_and_no_schedule() {
        let mut template = Message::new(5).with_priority(9);
        template.schedule = Some(Schedule::new(10, -1, false));
        let fired = template.fire_copy();
        assert_ne!(fired.id(), template.id());
        assert!(fired.schedule.is_none());
        assert_eq!(fired.priority, 9);
    }

    #[test]
    fn recurrence_counts_down_to_exactly_r_plus_one_fires_then_disables() {
        let mut sched = Schedule::new(10, 2, false);
        let mut fires = 0;
        for _ in 0..10 {
            let (tick, _) = sched.apply_time(10);
            if matches!(tick, ScheduleTick::FireAndRetain) {
                fires += 1;
            }
            if !sched.enabled {
                break;
            }
        }
        assert_eq!(fires, 3);
        assert!(!sched.enabled);
    }

    #[test]
    fn recurrence_with_auto_clear_fires_then_drops() {
        let mut sched = Schedule::new(10, 0, true);
        let (tick, _) = sched.apply_time(10);
        assert_eq!(tick, ScheduleTick::FireAndDrop);
    }

    #[test]
    fn lagging_tick_clamps_to_period_and_reports_lag() {
        let mut sched = Schedule::new(10, -1, false);
        let (tick, lagged) = sched.apply_time(250);
        assert_eq!(tick, ScheduleTick::FireAndRetain);
        assert!(lagged);
        assert_eq!(sched.time_to_wait, 10);
    }

    #[test]
    fn reenabling_a_disabled_schedule_forces_an_immediate_fire() {
        let mut sched = Schedule::new(100, -1, false);
        sched.enable(false);
        sched.enable(true);
        let (tick, _) = sched.apply_time(1);
        assert_eq!(tick, ScheduleTick::FireAndRetain);
    }

    #[test]
    fn grammar_match_rejects_ambiguous_forms() {
        let forms = vec![vec![TypeTag::Uint32], vec![TypeTag::Int32]];
        assert_eq!(match_form(&forms, 4), Err(GrammarError::Ambiguous));
    }

    #[test]
    fn grammar_match_picks_the_unique_form_by_length() {
        let forms = vec![vec![TypeTag::Uint8], vec![TypeTag::Uint32]];
        let form = match_form(&forms, 4).unwrap();
        assert_eq!(form, &vec![TypeTag::Uint32]);
    }

    struct NoOpReceiver {
        notified: Rc<Cell<bool>>,
    }

    impl Receiver for NoOpReceiver {
        fn receiver_name(&self) -> &str {
            "no-op"
        }

        fn notify(&mut self, _msg: &Message) -> i8 {
            self.notified.set(true);
            1
        }
    }

    #[test]
    fn execute_runs_a_legacy_callback_instead_of_notifying_any_target() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_callback = fired.clone();
        let mut msg = Message::new(0x0017);
        msg.schedule = Some(Schedule::new(10, -1, false).with_legacy_callback(move || {
            fired_in_callback.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(msg.is_single_target());

        let notified = Rc::new(Cell::new(false));
        let mut receiver = NoOpReceiver { notified: notified.clone() };
        assert_eq!(msg.execute(Some(&mut receiver)), 1);

        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!notified.get(), "a legacy callback takes priority over any specific target");
    }

    #[test]
    fn execute_falls_back_to_the_target_when_there_is_no_legacy_callback() {
        let mut msg = Message::new(1);
        let notified = Rc::new(Cell::new(false));
        let mut receiver = NoOpReceiver { notified: notified.clone() };
        assert_eq!(msg.execute(Some(&mut receiver)), 1);
        assert!(notified.get());
    }

    #[test]
    fn execute_is_a_noop_with_neither_a_callback_nor_a_target() {
        let mut msg = Message::new(1);
        assert!(!msg.is_single_target());
        assert_eq!(msg.execute(None), 0);
    }

    #[test]
    fn inflate_arguments_parses_trailing_variable_length_tag() {
        let forms = vec![vec![TypeTag::Uint16, TypeTag::Binary]];
        let mut bytes = vec![0x01, 0x00];
        bytes.extend_from_slice(b"hello");
        let mut msg = Message::new(1);
        msg.inflate_arguments_from_buffer(&forms, &bytes).unwrap();
        assert_eq!(msg.args.len(), 2);
        assert_eq!(msg.args[0].as_u16().unwrap(), 1);
        assert_eq!(msg.args[1].bytes().unwrap(), b"hello");
    }
}
