//! # Factory Reset Watcher
//!
//! Both edges of the reset button are hooked. A press records the
//! timestamp; a release at least fifteen seconds later schedules the
//! `FactoryReset` interrupt for the next loop iteration. Everything in
//! the edge path is an integer compare plus `schedule_interrupt` — it
//! runs in interrupt context.
//!
//! The device binary registers a trampoline that reads the pin level
//! and the monotonic clock and forwards to [`on_edge`]; the state
//! machine itself is platform-free.

use core::cell::Cell;

use critical_section::Mutex;

use iop_common::interrupt::{schedule_interrupt, InterruptEvent};
use iop_common::log::{self, LogLevel};
use iop_hal::traits::{GpioInterface as _, PinMode, Platform};

/// Hold duration that qualifies as a factory reset request.
pub const HOLD_MS: u64 = 15_000;

static PRESSED_AT_MS: Mutex<Cell<Option<u64>>> = Mutex::new(Cell::new(None));

/// Configures the button pin and hooks the trampoline, when the build
/// provides one.
pub fn setup<P: Platform>(platform: &mut P, pin: u8, isr: Option<fn()>) {
    platform.gpio().mode(pin, PinMode::Input);
    if let Some(isr) = isr {
        platform.gpio().on_change(pin, isr);
    }
}

/// Edge handler. `level_high` is the pin level after the edge; `now_ms`
/// the monotonic clock at the time it fired.
pub fn on_edge(level_high: bool, now_ms: u64) {
    if level_high {
        critical_section::with(|cs| PRESSED_AT_MS.borrow(cs).set(Some(now_ms)));
        log::print_from_isr(
            "Pressed FACTORY_RESET button. Keep it pressed for at least 15 seconds to factory reset your device\n",
            LogLevel::Info,
        );
    } else {
        let pressed_at = critical_section::with(|cs| PRESSED_AT_MS.borrow(cs).replace(None));
        if let Some(pressed_at) = pressed_at {
            if now_ms.saturating_sub(pressed_at) >= HOLD_MS {
                schedule_interrupt(InterruptEvent::FactoryReset);
                log::print_from_isr(
                    "Set FACTORY_RESET flag, running it in the next loop run\n",
                    LogLevel::Info,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_common::interrupt::deschedule_interrupt;
    use serial_test::serial;
    use std::vec;

    fn drain() {
        while deschedule_interrupt() != InterruptEvent::None {}
    }

    #[test]
    #[serial]
    fn long_hold_schedules_factory_reset() {
        drain();
        on_edge(true, 1_000);
        on_edge(false, 17_000);
        assert_eq!(deschedule_interrupt(), InterruptEvent::FactoryReset);
    }

    #[test]
    #[serial]
    fn short_press_is_ignored() {
        drain();
        on_edge(true, 1_000);
        on_edge(false, 5_000);
        assert_eq!(deschedule_interrupt(), InterruptEvent::None);
    }

    #[test]
    #[serial]
    fn exactly_fifteen_seconds_qualifies() {
        drain();
        on_edge(true, 0);
        on_edge(false, HOLD_MS);
        assert_eq!(deschedule_interrupt(), InterruptEvent::FactoryReset);
    }

    #[test]
    #[serial]
    fn release_without_press_does_nothing() {
        drain();
        on_edge(false, 50_000);
        assert_eq!(deschedule_interrupt(), InterruptEvent::None);
    }
}
