//! # Level-Filtered Hookable Logger
//!
//! Each subsystem owns a [`Logger`] with its own minimum level and a
//! static target tag. All output funnels through a single process-wide
//! [`LogHook`]: six fn pointers the device binary points at its serial
//! sink (and, once authenticated, at the remote log staging buffer).
//!
//! Two print paths exist on purpose:
//!
//! - the *static* path takes `&'static str` and forwards the reference
//!   untouched, so flash-resident literals never hit a buffer;
//! - the *formatted* path renders `format_args!` into a bounded stack
//!   buffer and forwards a view.
//!
//! Only the two trace printers may be called from interrupt context; they
//! default to the regular printers and the device binary is expected to
//! repoint them at always-resident code.

use core::cell::Cell;
use core::fmt;
use core::fmt::Write as _;

use critical_section::Mutex;
use heapless::String;

use crate::panic::CodePoint;

/// Longest single formatted log line; longer output is truncated.
pub const MAX_LOG_LINE: usize = 255;

/// Severity, monotonically increasing. `NoLog` silences a logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Crit,
    NoLog,
}

impl LogLevel {
    /// Printed line prefix, with trailing space.
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Trace => "[TRACE] ",
            LogLevel::Debug => "[DEBUG] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Error => "[ERROR] ",
            LogLevel::Crit => "[CRIT] ",
            LogLevel::NoLog => "",
        }
    }
}

/// Where a fragment sits inside one logical line. Sinks that frame
/// output (timestamps, color) only decorate `Start`/`StartEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Start,
    Continuity,
    StartEnd,
    End,
}

/// Printer for runtime string views.
pub type ViewPrinter = fn(&str, LogLevel, LogKind);
/// Printer for flash-resident literals.
pub type StaticPrinter = fn(&'static str, LogLevel, LogKind);
/// Called once from [`setup`] with the global level.
pub type Setuper = fn(LogLevel);
/// Drains any buffering the sink does.
pub type Flusher = fn();

/// The process-wide log sink. Swap with [`set_hook`]; restore the default
/// with [`take_hook`].
#[derive(Clone, Copy)]
pub struct LogHook {
    pub view_print: ViewPrinter,
    pub static_print: StaticPrinter,
    pub setup: Setuper,
    pub flush: Flusher,
    /// May be called from interrupt context.
    pub trace_view_print: ViewPrinter,
    /// May be called from interrupt context.
    pub trace_static_print: StaticPrinter,
}

fn noop_view(_: &str, _: LogLevel, _: LogKind) {}
fn noop_static(_: &'static str, _: LogLevel, _: LogKind) {}
fn noop_setup(_: LogLevel) {}
fn noop_flush() {}

impl LogHook {
    /// Hook with the given printers; trace printers default to the
    /// regular ones.
    pub const fn new(
        view_print: ViewPrinter,
        static_print: StaticPrinter,
        setup: Setuper,
        flush: Flusher,
    ) -> Self {
        Self {
            view_print,
            static_print,
            setup,
            flush,
            trace_view_print: view_print,
            trace_static_print: static_print,
        }
    }

    /// Hook with dedicated trace printers. Those must be safe to call
    /// from an interrupt and should live in always-resident memory.
    pub const fn with_tracing(
        view_print: ViewPrinter,
        static_print: StaticPrinter,
        setup: Setuper,
        flush: Flusher,
        trace_view_print: ViewPrinter,
        trace_static_print: StaticPrinter,
    ) -> Self {
        Self {
            view_print,
            static_print,
            setup,
            flush,
            trace_view_print,
            trace_static_print,
        }
    }

    const fn default_hook() -> Self {
        Self::new(noop_view, noop_static, noop_setup, noop_flush)
    }
}

static HOOK: Mutex<Cell<LogHook>> = Mutex::new(Cell::new(LogHook::default_hook()));
static GLOBAL_LEVEL: Mutex<Cell<LogLevel>> = Mutex::new(Cell::new(LogLevel::Info));
static FLUSH_EACH_LINE: Mutex<Cell<bool>> = Mutex::new(Cell::new(true));

/// Records the global level and lets the sink initialize itself.
pub fn setup(level: LogLevel) {
    critical_section::with(|cs| GLOBAL_LEVEL.borrow(cs).set(level));
    (hook().setup)(level);
}

/// Replaces the process-wide hook.
pub fn set_hook(new_hook: LogHook) {
    critical_section::with(|cs| HOOK.borrow(cs).set(new_hook));
}

/// Removes the current hook, restoring the default, and returns it.
pub fn take_hook() -> LogHook {
    critical_section::with(|cs| HOOK.borrow(cs).replace(LogHook::default_hook()))
}

/// Whether every completed line should be followed by a sink flush.
/// Disable to coalesce bursts of writes.
pub fn should_flush(flush: bool) {
    critical_section::with(|cs| FLUSH_EACH_LINE.borrow(cs).set(flush));
}

/// True while the global level is `Trace`; arms [`Tracer`] scopes.
pub fn is_tracing() -> bool {
    critical_section::with(|cs| GLOBAL_LEVEL.borrow(cs).get()) == LogLevel::Trace
}

fn hook() -> LogHook {
    critical_section::with(|cs| HOOK.borrow(cs).get())
}

fn flush_enabled() -> bool {
    critical_section::with(|cs| FLUSH_EACH_LINE.borrow(cs).get())
}

/// Emits a single static fragment through the ISR-safe trace printer.
/// The only logging entry point interrupt handlers may use.
pub fn print_from_isr(msg: &'static str, level: LogLevel) {
    (hook().trace_static_print)(msg, level, LogKind::StartEnd);
}

/// Logger with its own minimum level and target tag.
///
/// Construction is const so subsystems can keep theirs in statics.
#[derive(Clone, Copy)]
pub struct Logger {
    level: LogLevel,
    target: &'static str,
}

enum Message<'a> {
    Static(&'static str),
    View(&'a str),
}

impl Logger {
    pub const fn new(level: LogLevel, target: &'static str) -> Self {
        Self { level, target }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::NoLog && level >= self.level
    }

    fn write(&self, level: LogLevel, msg: Message<'_>) {
        let hook = hook();
        (hook.static_print)(level.tag(), level, LogKind::Start);
        (hook.static_print)(self.target, level, LogKind::Continuity);
        (hook.static_print)(": ", level, LogKind::Continuity);
        match msg {
            Message::Static(text) => (hook.static_print)(text, level, LogKind::Continuity),
            Message::View(text) => (hook.view_print)(text, level, LogKind::Continuity),
        }
        (hook.static_print)("\n", level, LogKind::End);
        if flush_enabled() {
            (hook.flush)();
        }
    }

    /// Static-literal fast path; the message reference goes straight to
    /// the sink without touching a buffer.
    pub fn log(&self, level: LogLevel, msg: &'static str) {
        if self.enabled(level) {
            self.write(level, Message::Static(msg));
        }
    }

    /// Formatted path; rendered into a bounded stack buffer, truncating
    /// past [`MAX_LOG_LINE`].
    pub fn log_fmt(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let mut line: String<MAX_LOG_LINE> = String::new();
        let _ = line.write_fmt(args);
        self.write(level, Message::View(line.as_str()));
    }

    pub fn trace(&self, msg: &'static str) {
        self.log(LogLevel::Trace, msg);
    }

    pub fn debug(&self, msg: &'static str) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn info(&self, msg: &'static str) {
        self.log(LogLevel::Info, msg);
    }

    pub fn warn(&self, msg: &'static str) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: &'static str) {
        self.log(LogLevel::Error, msg);
    }

    pub fn crit(&self, msg: &'static str) {
        self.log(LogLevel::Crit, msg);
    }

    pub fn trace_fmt(&self, args: fmt::Arguments<'_>) {
        self.log_fmt(LogLevel::Trace, args);
    }

    pub fn debug_fmt(&self, args: fmt::Arguments<'_>) {
        self.log_fmt(LogLevel::Debug, args);
    }

    pub fn info_fmt(&self, args: fmt::Arguments<'_>) {
        self.log_fmt(LogLevel::Info, args);
    }

    pub fn warn_fmt(&self, args: fmt::Arguments<'_>) {
        self.log_fmt(LogLevel::Warn, args);
    }

    pub fn error_fmt(&self, args: fmt::Arguments<'_>) {
        self.log_fmt(LogLevel::Error, args);
    }

    pub fn crit_fmt(&self, args: fmt::Arguments<'_>) {
        self.log_fmt(LogLevel::Crit, args);
    }
}

/// Free-memory snapshot emitted on trace-scope entry.
#[derive(Debug, Clone, Copy)]
pub struct FreeMemory {
    pub stack: u32,
    pub heap: u32,
    pub biggest_block: u32,
}

/// Installed by the device binary so tracers can report memory pressure.
pub type MemoryProbe = fn() -> FreeMemory;

static MEMORY_PROBE: Mutex<Cell<Option<MemoryProbe>>> = Mutex::new(Cell::new(None));

pub fn set_memory_probe(probe: MemoryProbe) {
    critical_section::with(|cs| MEMORY_PROBE.borrow(cs).set(Some(probe)));
}

fn memory_probe() -> Option<MemoryProbe> {
    critical_section::with(|cs| MEMORY_PROBE.borrow(cs).get())
}

/// Scoped tracer: logs region entry (with free-memory counters when a
/// probe is installed) on construction and exit on drop. Does nothing
/// unless the global level is `Trace`, so release builds pay one branch.
///
/// Use through [`crate::iop_trace!`].
pub struct Tracer {
    point: CodePoint,
    armed: bool,
}

impl Tracer {
    pub fn new(point: CodePoint) -> Self {
        let armed = is_tracing();
        if armed {
            let hook = hook();
            let mut line: String<MAX_LOG_LINE> = String::new();
            let _ = write!(line, "[TRACE] enter {}", point);
            if let Some(probe) = memory_probe() {
                let memory = probe();
                let _ = write!(
                    line,
                    ", stack = {}, heap = {}, biggest block = {}",
                    memory.stack, memory.heap, memory.biggest_block
                );
            }
            let _ = line.push('\n');
            (hook.trace_view_print)(line.as_str(), LogLevel::Trace, LogKind::StartEnd);
        }
        Self { point, armed }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        if self.armed {
            let hook = hook();
            let mut line: String<MAX_LOG_LINE> = String::new();
            let _ = write!(line, "[TRACE] exit {}\n", self.point);
            (hook.trace_view_print)(line.as_str(), LogLevel::Trace, LogKind::StartEnd);
        }
    }
}

/// Opens a tracer scope covering the rest of the enclosing block.
#[macro_export]
macro_rules! iop_trace {
    () => {
        let _iop_tracer = $crate::log::Tracer::new($crate::code_point!());
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use serial_test::serial;
    use std::vec;

    static CAPTURED: Mutex<RefCell<String<1024>>> = Mutex::new(RefCell::new(String::new()));

    fn capture_view(msg: &str, _: LogLevel, _: LogKind) {
        critical_section::with(|cs| {
            let _ = CAPTURED.borrow_ref_mut(cs).push_str(msg);
        });
    }

    fn capture_static(msg: &'static str, level: LogLevel, kind: LogKind) {
        capture_view(msg, level, kind);
    }

    fn install_capture() {
        critical_section::with(|cs| CAPTURED.borrow_ref_mut(cs).clear());
        set_hook(LogHook::new(capture_view, capture_static, noop_setup, noop_flush));
    }

    fn captured() -> String<1024> {
        critical_section::with(|cs| CAPTURED.borrow_ref(cs).clone())
    }

    #[test]
    #[serial]
    fn lines_carry_level_tag_target_and_newline() {
        install_capture();
        let logger = Logger::new(LogLevel::Info, "LOOP");
        logger.info("Start Setup");
        assert_eq!(captured().as_str(), "[INFO] LOOP: Start Setup\n");
        take_hook();
    }

    #[test]
    #[serial]
    fn below_min_level_is_filtered() {
        install_capture();
        let logger = Logger::new(LogLevel::Warn, "API");
        logger.info("quiet");
        logger.debug("quieter");
        assert!(captured().is_empty());
        logger.error("loud");
        assert_eq!(captured().as_str(), "[ERROR] API: loud\n");
        take_hook();
    }

    #[test]
    #[serial]
    fn formatted_path_renders_arguments() {
        install_capture();
        let logger = Logger::new(LogLevel::Debug, "NET");
        logger.debug_fmt(format_args!("Response code ({}): {}", 200, "OK"));
        assert_eq!(captured().as_str(), "[DEBUG] NET: Response code (200): OK\n");
        take_hook();
    }

    #[test]
    #[serial]
    fn take_hook_restores_silence() {
        install_capture();
        let logger = Logger::new(LogLevel::Info, "X");
        let _ = take_hook();
        logger.info("dropped");
        assert!(captured().is_empty());
    }

    #[test]
    #[serial]
    fn tracer_is_disarmed_unless_tracing() {
        install_capture();
        setup(LogLevel::Info);
        {
            let _tracer = Tracer::new(crate::code_point!());
        }
        assert!(captured().is_empty());

        setup(LogLevel::Trace);
        {
            let _tracer = Tracer::new(crate::code_point!());
        }
        let output = captured();
        assert!(output.as_str().contains("enter"));
        assert!(output.as_str().contains("exit"));
        setup(LogLevel::Info);
        take_hook();
    }
}
