// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The subscriber contract, per spec.md §4.3.
//!
//! Every component the kernel can deliver a [`Message`] to implements
//! [`Receiver`]. The teacher's `EventReceiver` base class bundles this with a
//! `StringBuilder` local-log buffer and a verbosity mask; we keep both, since
//! the demo binary's `env_logger` only gives us kernel-wide logging and
//! per-receiver debug dumps are a distinct, addressable concern.

use crate::message::Message;

/// What a receiver's [`Receiver::callback_proc`] tells the kernel to do with
/// the `Message` it just finished processing. Maps directly onto the
/// `EVENT_CALLBACK_RETURN_*` constants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CallbackDisposition {
    /// Something went wrong; count it and drop the message.
    Error,
    /// No opinion; the kernel falls back to its default reclaim policy.
    Undefined,
    /// The message (and its heap-backed arguments) should be destroyed.
    Reap,
    /// The message should be returned to the preallocation pool intact.
    Recycle,
    /// The message is owned elsewhere (e.g. a schedule); do nothing.
    Drop,
}

/// Default verbosity for a freshly-attached receiver (spec.md §4.3: 0-7,
/// higher is noisier).
pub const DEFAULT_VERBOSITY: u8 = 3;

/// A kernel subscriber.
///
/// `notify` is called for every message a receiver is subscribed to, ahead of
/// (and independent of) the global call-ahead/call-back listener registries;
/// `callback_proc` is only called for messages this receiver itself
/// originated, once the kernel has finished routing them.
pub trait Receiver {
    /// A short, human-readable name used in debug dumps and logs.
    fn receiver_name(&self) -> &str;

    /// Delivers `msg`. Returns `0` if the receiver took no action, a
    /// positive value if it acted, or a negative value to report an error
    /// handling this message (spec.md §4.3/§8) — a negative return also
    /// counts as activity, but additionally makes the Kernel dump this
    /// receiver's debug state and local log to the process log (§4.4.2 step
    /// 3b). The default implementation does nothing and reports no action,
    /// matching `EventReceiver::notify`'s behavior for message codes a
    /// subclass doesn't override.
    fn notify(&mut self, msg: &Message) -> i8 {
        let _ = msg;
        0
    }

    /// Called once this receiver's own previously-raised `msg` has been
    /// fully routed, to decide its fate.
    fn callback_proc(&mut self, msg: &Message) -> CallbackDisposition {
        let _ = msg;
        CallbackDisposition::Undefined
    }

    /// Invoked exactly once, the first time `BOOT_COMPLETED` is delivered.
    fn boot_complete(&mut self) {}

    /// Called once, after the Kernel has booted and this receiver has been
    /// registered (immediately, for late joiners; deferred until boot for
    /// anything subscribed before `bootstrap()` runs).
    fn attached(&mut self) {}

    /// This receiver's current verbosity level (0-7).
    fn verbosity(&self) -> u8 {
        DEFAULT_VERBOSITY
    }

    /// Appends a human-readable dump of this receiver's internal state.
    fn print_debug(&self, out: &mut String) {
        out.push_str(self.receiver_name());
        out.push('\n');
    }

    /// Handles a line of text from an interactive debug console.
    fn proc_direct_debug_instruction(&mut self, _input: &str, _out: &mut String) {}

    /// Drains and returns this receiver's accumulated local log buffer,
    /// emptying it. Receivers that never buffer (most of them) can leave the
    /// default, which always returns an empty string.
    fn flush_local_log(&mut self) -> String {
        String::new()
    }
}
