// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs the kernel against a mock I2C bus: boots, scans the bus for two
//! devices, reads each present one, and lets the run loop idle out.

mod sensor;

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use log::info;
use manuvr_abi::{Argument, MsgDef, MsgFlags, TypeTag};
use manuvr_i2c::{BusAdapter, BusOpCallback, BusOpcode, I2cBus, MockI2cBus, MockResponse};
use manuvr_kernel::{Config, Kernel, Message, Receiver, StdPlatform};

use sensor::TempSensor;

/// A plain kernel subscriber used only to show broadcast delivery landing
/// somewhere observable; the interesting I2C-specific logic lives in
/// `TempSensor`, which is driven directly off the bus adapter instead.
struct BootLogger;

impl Receiver for BootLogger {
    fn receiver_name(&self) -> &str {
        "boot-logger"
    }

    fn notify(&mut self, msg: &Message) -> i8 {
        info!("boot-logger: saw code {:#06x}", msg.code);
        1
    }

    fn boot_complete(&mut self) {
        info!("boot-logger: kernel has booted");
    }
}

/// Satisfies `advance_work_queue`'s owner parameter once every queued op has
/// finished and there's nothing left to call back into.
struct NoOpOwner;
impl BusOpCallback for NoOpOwner {}

#[derive(Parser)]
#[command(about = "Runs the cooperative kernel against a mock I2C bus")]
struct Args {
    /// How many run-loop passes to execute before exiting.
    #[arg(long, default_value_t = 64)]
    passes: u32,

    /// TOML file to load the kernel's tuning knobs from, if present; always
    /// (re)written at startup so a fresh run has something to load next time.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) if path.exists() => Config::load(path)?,
        _ => Config::default(),
    };
    if let Some(path) = &args.config {
        config.save(path)?;
    }
    let mut kernel = Kernel::new(StdPlatform::new(), config);

    kernel.register_message(
        MsgDef::new(0x1001, MsgFlags::empty(), "SENSOR_READING").with_form(vec![TypeTag::Uint8]),
    );

    kernel.subscribe(Box::new(BootLogger), 0);
    kernel.bootstrap();

    let mut bus = MockI2cBus::new();
    bus.set_response(0x27, MockResponse::Ack);
    bus.write(0x27, &[72]).ok(); // pre-seed the register the sensor will echo back.

    let mut adapter = BusAdapter::new(kernel.config().bus_prealloc_pool_size);
    adapter.ping_all(&[0x27, 0x42], &mut bus);
    for (addr, result) in [(0x27u8, adapter.ping_map()[0x27]), (0x42, adapter.ping_map()[0x42])] {
        info!("ping 0x{:02x}: {:?}", addr, result);
    }

    let mut sensors = vec![TempSensor::new("sensor-27", 0x27), TempSensor::new("sensor-42", 0x42)];
    let mut owner = NoOpOwner;
    for sensor in &mut sensors {
        let op = adapter.new_op(BusOpcode::Rx, sensor.addr, None, vec![0u8], None);
        adapter.queue_io_job(op, sensor).unwrap();
    }
    // Ops were queued in `sensors` order at equal priority, so the adapter's
    // FIFO tie-break means this is also the order they'll finish in.
    let mut pending_owners: std::collections::VecDeque<usize> = (0..sensors.len()).collect();

    let mut last_poll = Instant::now();
    let mut pass = 0;
    while pass < args.passes {
        let now = Instant::now();
        kernel.advance_scheduler(elapsed_ms(now.duration_since(last_poll)));
        last_poll = now;

        let finished = match pending_owners.front() {
            Some(&idx) => adapter.advance_work_queue(&mut bus, &mut sensors[idx]),
            None => adapter.advance_work_queue(&mut bus, &mut owner),
        };
        if let Some(finished) = finished {
            pending_owners.pop_front();
            let mut msg = Message::new(0x1001);
            msg.add_arg(Argument::uint8(finished.fault as u8));
            let _ = kernel.isr_raise_event(msg);
        }

        kernel.proc_idle_flags();
        pass += 1;
        std::thread::sleep(Duration::from_millis(1));
    }

    for sensor in &sensors {
        info!(
            "{}: last_reading={:?} faults={}",
            sensor.receiver_name(),
            sensor.last_reading,
            sensor.faults
        );
    }

    info!("cpu usage: {:.1}%", kernel.cpu_usage_percent());
    info!("{}", kernel.describe());
    Ok(())
}

fn elapsed_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}
