//! Process-wide upgrade hook.
//!
//! When a response advertises a firmware image newer than the running
//! one, the client calls whatever is installed here. The default is a
//! no-op; the API layer installs a scheduler that enqueues the
//! `MustUpgrade` interrupt so the event loop upgrades on its own terms.

use core::cell::Cell;

use critical_section::Mutex;

/// Replaceable callback invoked when the server offers an upgrade.
#[derive(Clone, Copy)]
pub struct UpgradeHook {
    pub schedule: fn(),
}

fn noop() {}

impl UpgradeHook {
    pub const fn new(schedule: fn()) -> Self {
        Self { schedule }
    }

    const fn default_hook() -> Self {
        Self::new(noop)
    }
}

static HOOK: Mutex<Cell<UpgradeHook>> = Mutex::new(Cell::new(UpgradeHook::default_hook()));

/// Replaces the current hook.
pub fn set_upgrade_hook(hook: UpgradeHook) {
    critical_section::with(|cs| HOOK.borrow(cs).set(hook));
}

/// Removes the current hook, restoring the no-op default, and returns
/// the previous one.
pub fn take_upgrade_hook() -> UpgradeHook {
    critical_section::with(|cs| HOOK.borrow(cs).replace(UpgradeHook::default_hook()))
}

pub(crate) fn run_upgrade_hook() {
    let hook = critical_section::with(|cs| HOOK.borrow(cs).get());
    (hook.schedule)();
}
