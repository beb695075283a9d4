// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cooperative event-dispatch kernel: typed messages, a subscriber
//! registry, a timer wheel, and the porting seam it all runs against.

pub mod config;
pub mod kernel;
pub mod message;
pub mod platform;
pub mod receiver;

pub use config::{Config, ConfigIoError};
pub use kernel::{Counters, Kernel, Listener, ValidationError};
pub use message::{
    ArgAccessError, GrammarError, Message, MessageFlags, MessageId, Ownership, ReceiverId,
    Schedule, ScheduleTick,
};
pub use platform::{Millis, Platform, StdPlatform};
pub use receiver::{CallbackDisposition, Receiver};
