//! # Remote Log Sink
//!
//! Once the device owns a token, log lines of `Info` severity and above
//! are worth having on the server, not just on a serial port nobody is
//! watching. The device's log hook forwards lines here; an
//! authenticated task drains the staging buffer through the `/v1/log`
//! endpoint on its own cadence.
//!
//! Shipping logs produces logs. A flush guard drops anything staged
//! while a flush is in flight, so the sink cannot feed itself.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::String;

use iop_common::log::LogLevel;
use iop_common::panic::is_panicking;
use iop_common::AuthToken;
use iop_hal::traits::Platform;

use crate::EventLoop;

/// Staging buffer capacity; older lines win, a full buffer drops new
/// ones until the next flush.
pub const STAGING_CAPACITY: usize = 512;

/// Default drain cadence.
pub const FLUSH_INTERVAL_MS: u32 = 60_000;

static STAGED: Mutex<RefCell<String<STAGING_CAPACITY>>> =
    Mutex::new(RefCell::new(String::new()));
static FLUSHING: Mutex<RefCell<bool>> = Mutex::new(RefCell::new(false));

/// Appends one line fragment when it qualifies for remote shipping.
/// Called from the device's log hook printers.
pub fn stage(msg: &str, level: LogLevel) {
    if level < LogLevel::Info || is_panicking() {
        return;
    }
    critical_section::with(|cs| {
        if *FLUSHING.borrow_ref(cs) {
            return;
        }
        // Full buffer: drop the fragment, the flush task will catch up
        let _ = STAGED.borrow_ref_mut(cs).push_str(msg);
    });
}

/// Takes the staged text, leaving the buffer empty.
pub fn drain() -> Option<String<STAGING_CAPACITY>> {
    critical_section::with(|cs| {
        let mut staged = STAGED.borrow_ref_mut(cs);
        if staged.is_empty() {
            None
        } else {
            let taken = staged.clone();
            staged.clear();
            Some(taken)
        }
    })
}

fn set_flushing(active: bool) {
    critical_section::with(|cs| *FLUSHING.borrow_ref_mut(cs) = active);
}

/// The authenticated task that ships staged lines. Register through
/// [`EventLoop::enable_remote_logging`].
pub fn flush_task<P: Platform>(event_loop: &mut EventLoop<P>, token: &AuthToken) {
    let Some(text) = drain() else {
        return;
    };
    set_flushing(true);
    let status = {
        let (api, platform) = event_loop.api_and_platform();
        api.register_log(platform, token, text.as_str())
    };
    set_flushing(false);
    // Failed shipments are dropped; logs are telemetry, not records
    let _ = status;
}

impl<P: Platform> EventLoop<P> {
    /// Arms the remote log sink on the given cadence.
    pub fn enable_remote_logging(&mut self, interval_ms: u32) {
        self.set_authenticated_interval(interval_ms, flush_task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::vec;

    fn clear() {
        let _ = drain();
        set_flushing(false);
    }

    #[test]
    #[serial]
    fn stages_info_and_above_only() {
        clear();
        stage("[DEBUG] quiet\n", LogLevel::Debug);
        stage("[TRACE] quieter\n", LogLevel::Trace);
        assert_eq!(drain(), None);

        stage("[INFO] loud\n", LogLevel::Info);
        stage("[ERROR] louder\n", LogLevel::Error);
        let staged = drain().unwrap();
        assert_eq!(staged.as_str(), "[INFO] loud\n[ERROR] louder\n");
    }

    #[test]
    #[serial]
    fn drain_empties_the_buffer() {
        clear();
        stage("line\n", LogLevel::Info);
        assert!(drain().is_some());
        assert_eq!(drain(), None);
    }

    #[test]
    #[serial]
    fn nothing_stages_while_flushing() {
        clear();
        set_flushing(true);
        stage("[INFO] recursive\n", LogLevel::Info);
        set_flushing(false);
        assert_eq!(drain(), None);
    }

    #[test]
    #[serial]
    fn full_buffer_drops_new_fragments() {
        clear();
        let long = [b'x'; STAGING_CAPACITY];
        stage(core::str::from_utf8(&long).unwrap(), LogLevel::Info);
        stage("overflow\n", LogLevel::Info);
        let staged = drain().unwrap();
        assert_eq!(staged.len(), STAGING_CAPACITY);
        assert!(!staged.as_str().contains("overflow"));
    }
}
