//! # Panic Hook Machinery
//!
//! A firmware panic is an invariant violation, not an error to recover
//! from in place. The [`iop_panic!`]/[`iop_assert!`] macros capture the
//! failing code point and hand control to a process-wide [`PanicHook`]:
//! four replaceable fn pointers the device binary arms with the full
//! recovery pipeline (report to server, attempt upgrade, deep-sleep).
//!
//! The default hook only logs and halts; the reentry guard lives in the
//! default `entry` so a panic raised *while handling a panic* cannot loop.

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;

use crate::log::{self, LogLevel};

/// Source location of a panic or traced scope.
#[derive(Debug, Clone, Copy)]
pub struct CodePoint {
    file: &'static str,
    line: u32,
    func: &'static str,
}

impl CodePoint {
    /// Use [`crate::code_point!`] rather than constructing by hand.
    pub const fn new(file: &'static str, line: u32, func: &'static str) -> Self {
        Self { file, line, func }
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn func(&self) -> &'static str {
        self.func
    }
}

impl fmt::Display for CodePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.func)
    }
}

/// What gets reported to the monitor server when a panic reaches the
/// recovery pipeline. The message may shrink during serialization; the
/// code point never does.
#[derive(Debug, Clone, Copy)]
pub struct PanicData<'a> {
    pub msg: &'a str,
    pub file: &'static str,
    pub line: u32,
    pub func: &'static str,
}

impl<'a> PanicData<'a> {
    pub fn new(msg: &'a str, point: &CodePoint) -> Self {
        Self {
            msg,
            file: point.file,
            line: point.line,
            func: point.func,
        }
    }
}

pub type EntryHook = fn(&str, &CodePoint);
pub type ViewPanicHook = fn(&str, &CodePoint);
pub type StaticPanicHook = fn(&'static str, &CodePoint);
pub type HaltHook = fn(&str, &CodePoint) -> !;

/// The four-stage panic surface. All stages replaceable at runtime.
#[derive(Clone, Copy)]
pub struct PanicHook {
    /// Reentry guard + settle delay. Runs first.
    pub entry: EntryHook,
    /// Formats and logs runtime messages at `Crit`.
    pub view_panic: ViewPanicHook,
    /// Formats and logs static messages at `Crit`.
    pub static_panic: StaticPanicHook,
    /// Terminal. Must not return.
    pub halt: HaltHook,
}

impl PanicHook {
    pub const fn new(
        entry: EntryHook,
        view_panic: ViewPanicHook,
        static_panic: StaticPanicHook,
        halt: HaltHook,
    ) -> Self {
        Self {
            entry,
            view_panic,
            static_panic,
            halt,
        }
    }

    const fn default_hook() -> Self {
        Self::new(default_entry, default_view_panic, default_static_panic, default_halt)
    }
}

static HOOK: Mutex<Cell<PanicHook>> = Mutex::new(Cell::new(PanicHook::default_hook()));
static PANICKING: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));

/// Replaces the process-wide panic hook.
pub fn set_panic_hook(hook: PanicHook) {
    critical_section::with(|cs| HOOK.borrow(cs).set(hook));
}

/// Removes the current hook, restoring the default, and returns it.
pub fn take_panic_hook() -> PanicHook {
    critical_section::with(|cs| HOOK.borrow(cs).replace(PanicHook::default_hook()))
}

/// True once a panic is in flight. Recovery code consults this to decide
/// whether a nested failure should skip reporting.
pub fn is_panicking() -> bool {
    critical_section::with(|cs| PANICKING.borrow(cs).get())
}

/// Marks the panic flag, returning whether it was already set.
pub fn enter_panic() -> bool {
    critical_section::with(|cs| PANICKING.borrow(cs).replace(true))
}

#[cfg(test)]
pub fn reset_panic_flag() {
    critical_section::with(|cs| PANICKING.borrow(cs).set(false));
}

/// Default entry: reentry guard only. The armed hook additionally sleeps
/// one second so serial output drains before recovery starts.
pub fn default_entry(msg: &str, point: &CodePoint) {
    if enter_panic() {
        log::print_from_isr("PANIC REENTRY: ", LogLevel::Crit);
        // The message itself is runtime data; the static trace channel
        // cannot carry it, so the reentry line names only the location.
        let _ = msg;
        log::print_from_isr(point.file, LogLevel::Crit);
        log::print_from_isr("\n", LogLevel::Crit);
        default_halt(msg, point);
    }
}

pub fn default_view_panic(msg: &str, point: &CodePoint) {
    let logger = log::Logger::new(LogLevel::Trace, "PANIC");
    logger.crit_fmt(format_args!(
        "Line {} of file {} inside {}: {}",
        point.line, point.file, point.func, msg
    ));
}

pub fn default_static_panic(msg: &'static str, point: &CodePoint) {
    default_view_panic(msg, point);
}

/// Default terminal: park forever. The armed hook deep-sleeps and retries
/// recovery instead.
pub fn default_halt(_msg: &str, _point: &CodePoint) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Runs the hook pipeline for a runtime message. Never returns.
pub fn panic_handler(msg: &str, point: CodePoint) -> ! {
    let hook = critical_section::with(|cs| HOOK.borrow(cs).get());
    (hook.entry)(msg, &point);
    (hook.view_panic)(msg, &point);
    (hook.halt)(msg, &point)
}

/// Runs the hook pipeline for a static message. Never returns.
pub fn panic_handler_static(msg: &'static str, point: CodePoint) -> ! {
    let hook = critical_section::with(|cs| HOOK.borrow(cs).get());
    (hook.entry)(msg, &point);
    (hook.static_panic)(msg, &point);
    (hook.halt)(msg, &point)
}

/// Captures the caller's location as a [`CodePoint`].
#[macro_export]
macro_rules! code_point {
    () => {
        $crate::panic::CodePoint::new(file!(), line!(), module_path!())
    };
}

/// Firmware panic: logs through the hook pipeline, reports to the server
/// when recovery is armed, never returns.
#[macro_export]
macro_rules! iop_panic {
    ($msg:literal) => {
        $crate::panic::panic_handler_static($msg, $crate::code_point!())
    };
    ($msg:expr) => {
        $crate::panic::panic_handler(($msg).as_ref(), $crate::code_point!())
    };
}

/// Panics with the given message when the condition does not hold.
#[macro_export]
macro_rules! iop_assert {
    ($cond:expr, $msg:literal) => {
        if !($cond) {
            $crate::iop_panic!($msg);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::vec;

    fn recording_entry(_: &str, _: &CodePoint) {}
    fn recording_view(_: &str, _: &CodePoint) {}
    fn recording_static(_: &'static str, _: &CodePoint) {}
    fn unwinding_halt(msg: &str, _: &CodePoint) -> ! {
        panic!("halted: {}", msg);
    }

    fn install_unwinding_hook() {
        set_panic_hook(PanicHook::new(
            recording_entry,
            recording_view,
            recording_static,
            unwinding_halt,
        ));
    }

    #[test]
    #[serial]
    #[should_panic(expected = "halted: queue exhausted")]
    fn panic_reaches_halt_stage() {
        reset_panic_flag();
        install_unwinding_hook();
        iop_panic!("queue exhausted");
    }

    #[test]
    #[serial]
    #[should_panic(expected = "halted: bad invariant")]
    fn assert_panics_on_false_condition() {
        reset_panic_flag();
        install_unwinding_hook();
        iop_assert!(1 + 1 == 3, "bad invariant");
    }

    #[test]
    #[serial]
    fn assert_is_silent_on_true_condition() {
        reset_panic_flag();
        install_unwinding_hook();
        iop_assert!(1 + 1 == 2, "unreachable");
        let _ = take_panic_hook();
    }

    #[test]
    #[serial]
    fn entering_twice_reports_reentry() {
        reset_panic_flag();
        assert!(!enter_panic());
        assert!(enter_panic());
        reset_panic_flag();
    }

    #[test]
    #[serial]
    fn code_point_macro_captures_location() {
        let point = code_point!();
        assert!(point.file().ends_with("panic.rs"));
        assert!(point.line() > 0);
        assert!(point.func().contains("tests"));
    }
}
