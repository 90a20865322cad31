//! # IoP Event Loop
//!
//! The scheduling core of the device. One cooperative thread drives
//! everything: draining the interrupt queue, keeping NTP fresh, walking
//! the credential acquisition strategies (stored → hardcoded → captive
//! portal), sampling sensors on cadence and shipping readings to the
//! monitor server.
//!
//! The loop uniquely owns the platform, the API client, the captive
//! portal and the persistent store handle; it is the only place
//! persistent state is mutated in response to network status (removing
//! a refused token, persisting the credentials that got the station
//! online, wiping everything on factory reset).

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

#[cfg(test)]
extern crate std;

pub mod recovery;
pub mod remote_log;
pub mod reset;

use heapless::Vec;

use iop_api::{Api, UpgradeStatus};
use iop_common::interrupt::{deschedule_interrupt, InterruptEvent};
use iop_common::log::{self, LogLevel, Logger};
use iop_common::utils::scape_non_printable;
use iop_common::{iop_panic, AuthToken};
use iop_hal::sensors::SensorsInterface as _;
use iop_hal::traits::{
    DeviceInterface as _, GpioInterface as _, PinMode, Platform, StationStatus,
    TimeInterface as _, WifiInterface as _,
};
use iop_network::NetworkStatus;
use iop_portal::CredentialsServer;
use iop_storage::Storage;

/// Current version of the iop-loop library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const SIX_HOURS_MS: u64 = 6 * 60 * 60 * 1000;
const ONE_HOUR_MS: u64 = 60 * 60 * 1000;
const ONE_MINUTE_MS: u64 = 60 * 1000;
const TEN_SECONDS_MS: u64 = 10 * 1000;

/// Scheduled task slots; the built-in measurement task occupies one.
pub const MAX_TASKS: usize = 4;

/// Outcome of a station connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResponse {
    Ok,
    Timeout,
}

/// Compile-time device configuration.
#[derive(Clone, Copy)]
pub struct LoopConfig {
    /// Monitor server base URI; must carry a scheme.
    pub uri: &'static str,
    pub log_level: LogLevel,
    /// Milliseconds between sensor measurements.
    pub measurement_interval_ms: u32,
    pub factory_reset_pin: u8,
    pub led_pin: u8,
    /// Compile-time WiFi credentials, when the build carries them.
    pub hardcoded_wifi: Option<(&'static str, &'static str)>,
    /// Compile-time IoP account credentials.
    pub hardcoded_iop: Option<(&'static str, &'static str)>,
    /// Credentials of the provisioning access point.
    pub ap_ssid: &'static str,
    pub ap_password: &'static str,
    /// Device-specific trampoline for the factory reset button edges;
    /// it should read the pin and clock and call [`reset::on_edge`].
    pub factory_reset_isr: Option<fn()>,
    /// Trust-anchor bundle for TLS builds; `None` means the transport
    /// speaks plain HTTP.
    pub certificates: Option<&'static iop_hal::certs::CertificateBundle>,
}

impl LoopConfig {
    pub const fn new(uri: &'static str) -> Self {
        Self {
            uri,
            log_level: LogLevel::Info,
            measurement_interval_ms: 180_000,
            factory_reset_pin: 5,
            led_pin: 2,
            hardcoded_wifi: None,
            hardcoded_iop: None,
            ap_ssid: "iop-plantomator",
            ap_password: "le$memester#passwordz",
            factory_reset_isr: None,
            certificates: None,
        }
    }
}

struct TaskInterval<P: Platform> {
    next: u64,
    interval: u32,
    func: fn(&mut EventLoop<P>),
}

struct AuthenticatedTaskInterval<P: Platform> {
    next: u64,
    interval: u32,
    func: fn(&mut EventLoop<P>, &AuthToken),
}

/// The device control plane.
pub struct EventLoop<P: Platform> {
    platform: P,
    config: LoopConfig,
    api: Api,
    portal: CredentialsServer,
    storage: Storage,
    logger: Logger,
    led_state: bool,

    next_ntp_sync: u64,
    next_try_stored_wifi: u64,
    next_try_hardcoded_wifi: u64,
    next_try_hardcoded_iop: u64,
    next_handle_connection_lost: u64,
    next_yield_log: u64,

    tasks: Vec<TaskInterval<P>, MAX_TASKS>,
    authenticated_tasks: Vec<AuthenticatedTaskInterval<P>, MAX_TASKS>,
}

impl<P: Platform> EventLoop<P> {
    pub fn new(platform: P, config: LoopConfig) -> Self {
        let api = match config.certificates {
            Some(bundle) => Api::with_certificates(config.uri, config.log_level, bundle),
            None => Api::new(config.uri, config.log_level),
        };
        Self {
            platform,
            api,
            portal: CredentialsServer::new(config.log_level),
            storage: Storage::new(config.log_level),
            logger: Logger::new(config.log_level, "LOOP"),
            led_state: false,
            next_ntp_sync: 0,
            next_try_stored_wifi: 0,
            next_try_hardcoded_wifi: 0,
            next_try_hardcoded_iop: 0,
            next_handle_connection_lost: 0,
            next_yield_log: 0,
            tasks: Vec::new(),
            authenticated_tasks: Vec::new(),
            config,
        }
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Split borrow for callers that need to drive the API with the
    /// platform while the loop is held (e.g. the remote log task).
    pub fn api_and_platform(&mut self) -> (&Api, &mut P) {
        (&self.api, &mut self.platform)
    }

    /// The persisted auth token, if any.
    pub fn stored_token(&mut self) -> Option<AuthToken> {
        self.storage.token(self.platform.flash())
    }

    /// The persisted WiFi credential pair, if any.
    pub fn stored_wifi(&mut self) -> Option<iop_common::WifiCredentials> {
        self.storage.wifi(self.platform.flash())
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// One-time boot initialization: pins, store, reset watcher,
    /// sensors, API hooks and the built-in measurement cadence.
    pub fn setup(&mut self) {
        log::setup(self.config.log_level);
        self.logger.info("Start Setup");

        self.platform
            .gpio()
            .mode(self.config.led_pin, PinMode::Output);

        self.storage.setup(self.platform.flash());
        reset::setup(
            &mut self.platform,
            self.config.factory_reset_pin,
            self.config.factory_reset_isr,
        );
        self.platform.sensors().setup();
        self.api.setup(&mut self.platform);
        self.portal
            .set_access_point_credentials(self.config.ap_ssid, self.config.ap_password);

        self.set_authenticated_interval(self.config.measurement_interval_ms, Self::measure_task);

        self.logger.info("Setup finished");
        self.logger.info_fmt(format_args!(
            "MD5: {}",
            self.platform.device().firmware_hash()
        ));
    }

    /// Registers a periodic task.
    pub fn set_interval(&mut self, interval_ms: u32, func: fn(&mut EventLoop<P>)) {
        let _ = self.tasks.push(TaskInterval {
            next: 0,
            interval: interval_ms,
            func,
        });
    }

    /// Registers a periodic task that only runs while a token exists.
    pub fn set_authenticated_interval(
        &mut self,
        interval_ms: u32,
        func: fn(&mut EventLoop<P>, &AuthToken),
    ) {
        let _ = self.authenticated_tasks.push(AuthenticatedTaskInterval {
            next: 0,
            interval: interval_ms,
            func,
        });
    }

    /// One loop iteration. The firmware main loop calls this forever;
    /// tests call it step by step.
    pub fn iterate(&mut self) {
        // Activity indicator
        self.led_state = !self.led_state;
        let led_pin = self.config.led_pin;
        let led_state = self.led_state;
        self.platform.gpio().write(led_pin, led_state);

        let token = self.storage.token(self.platform.flash());

        // Handle all queued interrupts (at most one of each kind)
        loop {
            let event = deschedule_interrupt();
            if event == InterruptEvent::None {
                break;
            }
            self.handle_interrupt(event, token.as_ref());
            self.platform.time().yield_now();
        }

        let now = self.platform.time().now_ms();
        let is_connected = self.platform.wifi().is_connected();

        if is_connected && token.is_some() {
            self.portal.close(&mut self.platform);
        }

        if is_connected && self.next_ntp_sync <= now {
            self.logger.info("Syncing NTP");
            self.platform.device().sync_ntp();
            self.next_ntp_sync = now + SIX_HOURS_MS;
            self.logger.info("Time synced");
        } else if is_connected && token.is_none() {
            self.handle_iop_credentials(now);
        } else if !is_connected {
            self.handle_not_connected(now);
        } else if let Some(token) = token {
            self.next_handle_connection_lost = 0;
            let ran_auth = self.run_authenticated_tasks(now, &token);
            let ran_plain = self.run_tasks(now);
            if !ran_auth && !ran_plain && self.next_yield_log <= now {
                self.next_yield_log = now + TEN_SECONDS_MS;
                self.logger.trace("Waiting");
            }
        }
    }

    fn run_authenticated_tasks(&mut self, now: u64, token: &AuthToken) -> bool {
        let mut ran = false;
        for idx in 0..self.authenticated_tasks.len() {
            if self.authenticated_tasks[idx].next <= now {
                let interval = self.authenticated_tasks[idx].interval;
                self.authenticated_tasks[idx].next = now + u64::from(interval);
                let func = self.authenticated_tasks[idx].func;
                func(self, token);
                ran = true;
            }
        }
        ran
    }

    fn run_tasks(&mut self, now: u64) -> bool {
        let mut ran = false;
        for idx in 0..self.tasks.len() {
            if self.tasks[idx].next <= now {
                let interval = self.tasks[idx].interval;
                self.tasks[idx].next = now + u64::from(interval);
                let func = self.tasks[idx].func;
                func(self);
                ran = true;
            }
        }
        ran
    }

    fn measure_task(loop_: &mut EventLoop<P>, token: &AuthToken) {
        loop_.handle_measurements(token);
    }

    fn handle_interrupt(&mut self, event: InterruptEvent, token: Option<&AuthToken>) {
        match event {
            InterruptEvent::None => {}

            InterruptEvent::FactoryReset => {
                self.logger.warn("Factory Reset: deleting stored credentials");
                self.storage.remove_wifi(self.platform.flash());
                self.storage.remove_token(self.platform.flash());
                self.platform.wifi().disconnect();
            }

            InterruptEvent::MustUpgrade => {
                let Some(token) = token else {
                    self.logger
                        .error("Upgrade was expected, but no auth token was available");
                    return;
                };
                match self.api.upgrade(&mut self.platform, token) {
                    UpgradeStatus::Failed(NetworkStatus::Forbidden) => {
                        // The token may be stale, but dropping it here would
                        // strand a device that is trying to recover
                        self.logger.warn("Invalid auth token, but keeping since at OTA");
                    }
                    UpgradeStatus::Failed(NetworkStatus::BrokenClient) => {
                        iop_panic!("Api::upgrade internal buffer overflow")
                    }
                    UpgradeStatus::Failed(_) | UpgradeStatus::NoUpdate => {
                        // Nothing to be done besides retrying later
                    }
                    UpgradeStatus::Updated => {
                        self.logger.info("Upgrade installed, awaiting reboot");
                    }
                }
            }

            InterruptEvent::OnConnection => {
                // We treat wifi credentials as a blob instead of worrying
                // about encoding
                let credentials = self.platform.wifi().credentials();
                self.logger.info_fmt(format_args!(
                    "Connected to network: {}",
                    scape_non_printable(credentials.ssid.trimmed())
                ));
                // set_wifi compares first, so an unchanged network costs
                // no flash write
                self.storage.set_wifi(self.platform.flash(), &credentials);
            }
        }
    }

    fn handle_not_connected(&mut self, now: u64) {
        // Wifi credentials are only removed when replaced by new ones or
        // during factory reset, so connection loss gets retried from
        // flash on a long cadence before the portal opens
        let stored = self.storage.wifi(self.platform.flash());

        if let Some(credentials) = stored.filter(|_| self.next_try_stored_wifi <= now) {
            self.next_try_stored_wifi = now + ONE_HOUR_MS;
            self.logger.info_fmt(format_args!(
                "Trying wifi credentials stored in flash: {}",
                scape_non_printable(credentials.ssid.trimmed())
            ));
            self.connect(
                credentials.ssid.as_bytes(),
                credentials.password.as_bytes(),
            );
        } else if let Some((ssid, password)) = self
            .config
            .hardcoded_wifi
            .filter(|_| self.next_try_hardcoded_wifi <= now)
        {
            // Hardcoded credentials cannot be deleted when wrong, so the
            // retry interval stays long
            self.next_try_hardcoded_wifi = now + ONE_HOUR_MS;
            self.logger.info("Trying hardcoded wifi credentials");
            self.connect(ssid.as_bytes(), password.as_bytes());
        } else if self.next_handle_connection_lost < now {
            self.logger.debug("Has no signal, opening the provisioning server");
            self.next_handle_connection_lost = now + ONE_MINUTE_MS;
            self.handle_credentials();
        }
    }

    fn handle_iop_credentials(&mut self, now: u64) {
        if let Some((email, password)) = self
            .config
            .hardcoded_iop
            .filter(|_| self.next_try_hardcoded_iop <= now)
        {
            self.next_try_hardcoded_iop = now + ONE_HOUR_MS;
            self.logger.info("Trying hardcoded iop credentials");
            if let Some(token) = self.authenticate(email, password) {
                self.storage.set_token(self.platform.flash(), &token);
            }
        } else {
            self.handle_credentials();
        }
    }

    /// One captive portal round; a token collected through the form is
    /// persisted.
    fn handle_credentials(&mut self) {
        let has_token = self.storage.token(self.platform.flash()).is_some();
        let token = self.portal.serve(&mut self.platform, &self.api, has_token);
        if let Some(token) = token {
            self.storage.set_token(self.platform.flash(), &token);
        }
    }

    fn handle_measurements(&mut self, token: &AuthToken) {
        self.logger.debug("Handle Measurements");

        let reading = self.platform.sensors().measure();
        let Some(event) = self.api.make_event_json(&reading) else {
            iop_panic!("Api::registerEvent internal buffer overflow")
        };

        match self.api.register_event(&mut self.platform, token, &event) {
            NetworkStatus::Forbidden => {
                self.logger.error("Unable to send measurements");
                self.logger.warn("Auth token was refused, deleting it");
                self.storage.remove_token(self.platform.flash());
            }
            NetworkStatus::BrokenClient => {
                self.logger.error("Unable to send measurements");
                iop_panic!("Api::registerEvent rejected our own envelope")
            }
            // Already logged at the network level; retried next cadence
            NetworkStatus::BrokenServer | NetworkStatus::ConnectionIssues => {}
            NetworkStatus::Ok => {}
        }
    }

    /// Station connect attempt, with a mid-`Connecting` radio torn down
    /// under the interrupt lock first.
    pub fn connect(&mut self, ssid: &[u8], password: &[u8]) -> ConnectResponse {
        self.logger
            .info_fmt(format_args!("Connect: {}", scape_non_printable(ssid)));

        if self.platform.wifi().status() == StationStatus::Connecting {
            let wifi = self.platform.wifi();
            critical_section::with(|_| wifi.disconnect());
        }

        if !self.platform.wifi().begin(ssid, password) {
            self.logger.error("Wifi authentication timed out");
            return ConnectResponse::Timeout;
        }

        if !self.platform.wifi().is_connected() {
            let status = self.platform.wifi().status();
            self.logger.error_fmt(format_args!(
                "Invalid wifi credentials ({}): {}",
                status.name(),
                scape_non_printable(ssid)
            ));
        }
        ConnectResponse::Ok
    }

    /// Exchanges IoP account credentials for a token, flipping the
    /// radio to pure station mode around the request.
    pub fn authenticate(&mut self, email: &str, password: &str) -> Option<AuthToken> {
        self.platform
            .wifi()
            .set_mode(iop_hal::traits::WifiMode::Station);
        let result = self.api.authenticate(&mut self.platform, email, password);
        self.platform
            .wifi()
            .set_mode(iop_hal::traits::WifiMode::AccessPointStation);
        self.logger.info("Tried to authenticate");

        match result {
            Ok(token) => Some(token),
            Err(NetworkStatus::Forbidden) => {
                self.logger
                    .error_fmt(format_args!("Invalid IoP credentials: {}", email));
                None
            }
            Err(NetworkStatus::BrokenClient) => {
                iop_panic!("EventLoop::authenticate internal buffer overflow")
            }
            // Already logged at the network level
            Err(NetworkStatus::ConnectionIssues) | Err(NetworkStatus::BrokenServer) => None,
            // On success an AuthToken is returned, not OK
            Err(NetworkStatus::Ok) => iop_panic!("Unreachable"),
        }
    }
}
