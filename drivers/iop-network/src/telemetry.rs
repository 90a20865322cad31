//! Identity and telemetry headers sent with every request.
//!
//! Gathered into an owned snapshot *before* the session opens, then
//! applied as headers. The server-side fleet dashboard is built on these
//! names; they are part of the wire contract.

use core::fmt::Write as _;

use heapless::String;

use iop_common::{FirmwareHash, MacAddress};
use iop_hal::http::HttpSessionInterface;
use iop_hal::traits::{
    DeviceInterface as _, MemoryRegion, Platform, TimeInterface as _,
};

type Counter = String<12>;

/// One request's worth of device state.
pub struct Telemetry {
    mac: MacAddress,
    pub version: FirmwareHash,
    free_stack: Counter,
    free_dram: Counter,
    biggest_dram_block: Counter,
    free_iram: Counter,
    biggest_iram_block: Counter,
    vcc: Counter,
    time_running: String<20>,
    platform: &'static str,
}

fn counter(value: u32) -> Counter {
    let mut out = Counter::new();
    let _ = write!(out, "{}", value);
    out
}

impl Telemetry {
    pub fn gather<P: Platform>(platform: &mut P) -> Self {
        let now = platform.time().now_ms();
        let device = platform.device();

        let mut time_running = String::new();
        let _ = write!(time_running, "{}", now);

        Self {
            mac: device.mac_address(),
            version: device.firmware_hash(),
            free_stack: counter(device.available_stack()),
            free_dram: counter(device.available_heap(MemoryRegion::Dram)),
            biggest_dram_block: counter(device.biggest_heap_block(MemoryRegion::Dram)),
            free_iram: counter(device.available_heap(MemoryRegion::Iram)),
            biggest_iram_block: counter(device.biggest_heap_block(MemoryRegion::Iram)),
            vcc: counter(u32::from(device.vcc())),
            time_running,
            platform: device.platform(),
        }
    }

    /// Adds the identity + telemetry header set. `origin` is the base
    /// URI the client was configured with.
    pub fn apply<S: HttpSessionInterface>(&self, session: &mut S, origin: &str) {
        session.add_header("MAC_ADDRESS", self.mac.as_str());
        session.add_header("VERSION", self.version.as_str());
        session.add_header("FREE_STACK", &self.free_stack);
        session.add_header("FREE_DRAM", &self.free_dram);
        session.add_header("BIGGEST_DRAM_BLOCK", &self.biggest_dram_block);
        session.add_header("FREE_IRAM", &self.free_iram);
        session.add_header("BIGGEST_IRAM_BLOCK", &self.biggest_iram_block);
        session.add_header("VCC", &self.vcc);
        session.add_header("TIME_RUNNING", &self.time_running);
        session.add_header("ORIGIN", origin);
        session.add_header("DRIVER", self.platform);
    }
}
