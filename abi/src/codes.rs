// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in message codes, per spec.md §3 and §6.

/// `0x0000` is reserved as "undefined" and must never be raised.
pub const UNDEFINED_CODE: u16 = 0x0000;

/// Codes at or below this are reserved for core kernel semantics.
pub const CORE_RESERVED_MAX: u16 = 0x1FFF;

/// Codes at or above this are available for user-space message definitions.
/// Per spec.md §3 this range overlaps the reserved range; `0x1000..=0x1FFF`
/// is shared ground where both core and user codes may legally live.
pub const USER_SPACE_MIN: u16 = 0x1000;

/// The core's built-in message codes. User-space code registration starts
/// numbering after [`MsgCode::LAST_RESERVED`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum MsgCode {
    BootCompleted = 0x0001,
    SysReboot = 0x0002,
    SysShutdown = 0x0003,
    SysBootloader = 0x0004,
    SysConfLoad = 0x0005,
    SysConfSave = 0x0006,
    SysSetDatetime = 0x0007,
    SysReportDatetime = 0x0008,
    SysDatetimeChanged = 0x0009,
    SysLogVerbosity = 0x000A,
    SysIssueLogItem = 0x000B,
    SysAdvertiseService = 0x000C,
    SysRetractService = 0x000D,
    LegendMessages = 0x000E,
    SelfDescribe = 0x000F,
    Subscribe = 0x0010,
    PowerMode = 0x0011,
    UserDebugInput = 0x0012,
    XportSend = 0x0013,
    XportReceive = 0x0014,
    XportQueueReady = 0x0015,
    XportCbQueueReady = 0x0016,
    DeferredFxn = 0x0017,
    SchedulerEnableByPid = 0x0018,
    SchedulerDisableByPid = 0x0019,
    SchedulerProfilerStart = 0x001A,
    SchedulerProfilerStop = 0x001B,
    SchedulerProfilerDump = 0x001C,
    CreateThreadId = 0x001D,
    DestroyThreadId = 0x001E,
    UnblockThread = 0x001F,
    OicReady = 0x0020,
    OicDiscovery = 0x0021,
    OicPing = 0x0022,
}

impl MsgCode {
    /// The last code number reserved by the core. Application code should
    /// register user-defined codes starting here or higher.
    pub const LAST_RESERVED: u16 = 0x0022;

    pub const fn code(self) -> u16 {
        self as u16
    }

    pub const fn label(self) -> &'static str {
        match self {
            MsgCode::BootCompleted => "BOOT_COMPLETED",
            MsgCode::SysReboot => "SYS_REBOOT",
            MsgCode::SysShutdown => "SYS_SHUTDOWN",
            MsgCode::SysBootloader => "SYS_BOOTLOADER",
            MsgCode::SysConfLoad => "SYS_CONF_LOAD",
            MsgCode::SysConfSave => "SYS_CONF_SAVE",
            MsgCode::SysSetDatetime => "SYS_SET_DATETIME",
            MsgCode::SysReportDatetime => "SYS_REPORT_DATETIME",
            MsgCode::SysDatetimeChanged => "SYS_DATETIME_CHANGED",
            MsgCode::SysLogVerbosity => "SYS_LOG_VERBOSITY",
            MsgCode::SysIssueLogItem => "SYS_ISSUE_LOG_ITEM",
            MsgCode::SysAdvertiseService => "SYS_ADVERTISE_SVC",
            MsgCode::SysRetractService => "SYS_RETRACT_SVC",
            MsgCode::LegendMessages => "LEGEND_MESSAGES",
            MsgCode::SelfDescribe => "SELF_DESCRIBE",
            MsgCode::Subscribe => "SUBSCRIBE",
            MsgCode::PowerMode => "POWER_MODE",
            MsgCode::UserDebugInput => "USER_DEBUG_INPUT",
            MsgCode::XportSend => "XPORT_SEND",
            MsgCode::XportReceive => "XPORT_RECEIVE",
            MsgCode::XportQueueReady => "XPORT_QUEUE_RDY",
            MsgCode::XportCbQueueReady => "XPORT_CB_QUEUE_RDY",
            MsgCode::DeferredFxn => "DEFERRED_FXN",
            MsgCode::SchedulerEnableByPid => "SCHED_ENABLE_BY_PID",
            MsgCode::SchedulerDisableByPid => "SCHED_DISABLE_BY_PID",
            MsgCode::SchedulerProfilerStart => "SCHED_PROFILER_START",
            MsgCode::SchedulerProfilerStop => "SCHED_PROFILER_STOP",
            MsgCode::SchedulerProfilerDump => "SCHED_PROFILER_DUMP",
            MsgCode::CreateThreadId => "CREATE_THREAD_ID",
            MsgCode::DestroyThreadId => "DESTROY_THREAD_ID",
            MsgCode::UnblockThread => "UNBLOCK_THREAD",
            MsgCode::OicReady => "OIC_READY",
            MsgCode::OicDiscovery => "OIC_DISCOVERY",
            MsgCode::OicPing => "OIC_PING",
        }
    }
}
