//! Internet of Plants device binary for the ESP32-C3.
//!
//! Boots the radio and the synchronous network stack, points the global
//! log and panic hooks at RTT and the recovery pipeline, then hands
//! control to the event loop forever.

#![no_std]
#![no_main]

extern crate alloc;

mod net;
mod platform;

use esp_hal::clock::CpuClock;
use esp_hal::main;
use rtt_target::{rprintln, rtt_init_print};
use static_cell::StaticCell;

use iop_common::log::{LogHook, LogKind, LogLevel};
use iop_common::panic::{CodePoint, PanicData, PanicHook};
use iop_loop::recovery::PanicRecovery;
use iop_loop::{remote_log, reset, EventLoop, LoopConfig};

use platform::Esp32Platform;

/// Build-time device configuration. The base URI must carry a scheme.
const CONFIG: LoopConfig = {
    let mut config = LoopConfig::new(env!("IOP_URI"));
    config.log_level = LogLevel::Info;
    config.factory_reset_isr = Some(factory_reset_isr);
    config
};

static EVENT_LOOP: StaticCell<EventLoop<Esp32Platform>> = StaticCell::new();

// The panic hook cannot capture the loop, so the running instance is
// also reachable through this pointer cell. The pointer is only
// dereferenced on the panic path, after the main loop is abandoned.
struct LoopPtr(*mut EventLoop<Esp32Platform>);
// Single-core target, accessed under the critical section only
unsafe impl Send for LoopPtr {}

static LOOP_HANDLE: critical_section::Mutex<core::cell::Cell<Option<LoopPtr>>> =
    critical_section::Mutex::new(core::cell::Cell::new(None));

// Regular printers: RTT plus the remote log staging buffer.
fn staged_view_print(msg: &str, level: LogLevel, _kind: LogKind) {
    rtt_target::rprint!("{}", msg);
    remote_log::stage(msg, level);
}

fn staged_static_print(msg: &'static str, level: LogLevel, kind: LogKind) {
    staged_view_print(msg, level, kind);
}

// Trace printers: RTT only, callable from interrupt context.
fn raw_view_print(msg: &str, _level: LogLevel, _kind: LogKind) {
    rtt_target::rprint!("{}", msg);
}

fn raw_static_print(msg: &'static str, level: LogLevel, kind: LogKind) {
    raw_view_print(msg, level, kind);
}

fn rtt_setup(_level: LogLevel) {}

fn rtt_flush() {}

fn panic_entry(msg: &str, point: &CodePoint) {
    iop_common::panic::default_entry(msg, point);
    // Let serial output drain before recovery starts
    esp_hal::delay::Delay::new().delay_millis(1000);
}

fn panic_halt(msg: &str, point: &CodePoint) -> ! {
    let data = PanicData::new(msg, point);
    let handle = critical_section::with(|cs| LOOP_HANDLE.borrow(cs).take());
    match handle {
        Some(LoopPtr(event_loop)) => {
            // The main loop never resumes past a panic; this is the only
            // live reference from here on
            let event_loop = unsafe { &mut *event_loop };
            let mut recovery = PanicRecovery::new(LogLevel::Info);
            let storage = iop_storage::Storage::new(LogLevel::Info);
            let api = iop_api::Api::new(CONFIG.uri, LogLevel::Info);
            recovery.run(event_loop.platform_mut(), &storage, &api, &data)
        }
        // Panicked before setup finished: nothing to recover with
        None => iop_common::panic::default_halt(msg, point),
    }
}

fn factory_reset_isr() {
    let (level, now) = platform::reset_pin_snapshot(CONFIG.factory_reset_pin);
    reset::on_edge(level, now);
}

#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo<'_>) -> ! {
    // Language-level panics (slice indexing, arithmetic) flow through
    // the same pipeline as explicit firmware panics
    let location = info.location();
    let point = CodePoint::new(
        location.map(|l| l.file()).unwrap_or("unknown"),
        location.map(|l| l.line()).unwrap_or(0),
        "rust_panic",
    );
    let mut msg: heapless::String<256> = heapless::String::new();
    let _ = core::fmt::write(&mut msg, format_args!("{}", info.message()));
    iop_common::panic::panic_handler(msg.as_str(), point)
}

#[main]
fn main() -> ! {
    rtt_init_print!();
    rprintln!("Internet of Plants starting");

    // WiFi stack needs a heap
    esp_alloc::heap_allocator!(size: 64 * 1024);

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    iop_common::log::set_hook(LogHook::with_tracing(
        staged_view_print,
        staged_static_print,
        rtt_setup,
        rtt_flush,
        raw_view_print,
        raw_static_print,
    ));
    iop_common::panic::set_panic_hook(PanicHook::new(
        panic_entry,
        iop_common::panic::default_view_panic,
        iop_common::panic::default_static_panic,
        panic_halt,
    ));

    let platform = Esp32Platform::initialize(peripherals);

    let event_loop = EVENT_LOOP.init(EventLoop::new(platform, CONFIG));
    event_loop.setup();
    event_loop.enable_remote_logging(remote_log::FLUSH_INTERVAL_MS);

    // Expose the loop to the panic pipeline now that it exists
    let ptr = LoopPtr(event_loop as *mut EventLoop<Esp32Platform>);
    critical_section::with(|cs| LOOP_HANDLE.borrow(cs).set(Some(ptr)));

    loop {
        event_loop.iterate();
        platform::yield_to_radio();
    }
}
