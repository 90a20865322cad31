//! # Global Interrupt Queue
//!
//! Hardware edges and network callbacks cannot touch the event loop's
//! state directly; they enqueue an [`InterruptEvent`] here and the loop
//! drains the queue at the top of every iteration.
//!
//! The queue is a fixed array with one slot per event variant, mutated
//! only inside a `critical-section` scope. Scheduling an event that is
//! already pending drops the duplicate, so at most one instance of each
//! variant is pending at any time and ISRs never spin or allocate.

use core::cell::Cell;

use critical_section::Mutex;

use crate::log::{self, LogLevel};

/// Asynchronous events the loop must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptEvent {
    None,
    /// Long-press on the factory reset button: wipe credentials.
    FactoryReset,
    /// The station got an IP; persist the credentials that worked.
    OnConnection,
    /// A response advertised a newer firmware image.
    MustUpgrade,
}

/// Pending-slot count; one per variant beyond `None`. Update when the
/// event enum grows.
pub const INTERRUPT_VARIANTS: usize = 3;

static PENDING: Mutex<Cell<[InterruptEvent; INTERRUPT_VARIANTS]>> =
    Mutex::new(Cell::new([InterruptEvent::None; INTERRUPT_VARIANTS]));

/// Schedules an event for the next loop iteration. Safe to call from an
/// interrupt: one scan, no blocking, no allocation. Duplicates of an
/// already-pending event are dropped.
pub fn schedule_interrupt(event: InterruptEvent) {
    if event == InterruptEvent::None {
        return;
    }

    let stored = critical_section::with(|cs| {
        let slot = PENDING.borrow(cs);
        let mut queue = slot.get();
        if queue.contains(&event) {
            // Already pending, coalesce
            return true;
        }
        for entry in queue.iter_mut() {
            if *entry == InterruptEvent::None {
                *entry = event;
                slot.set(queue);
                return true;
            }
        }
        false
    });

    if !stored {
        // Unreachable while the capacity matches the variant count, but
        // the queue must never fail silently
        log::print_from_isr("Interrupt queue is full, event dropped\n", LogLevel::Crit);
    }
}

/// Extracts one pending event, or `None` when the queue is empty. The
/// loop calls this until `None` comes back; ordering between distinct
/// pending events is unspecified.
pub fn deschedule_interrupt() -> InterruptEvent {
    critical_section::with(|cs| {
        let slot = PENDING.borrow(cs);
        let mut queue = slot.get();
        for entry in queue.iter_mut() {
            if *entry != InterruptEvent::None {
                let event = *entry;
                *entry = InterruptEvent::None;
                slot.set(queue);
                return event;
            }
        }
        InterruptEvent::None
    })
}
