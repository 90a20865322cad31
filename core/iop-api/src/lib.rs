//! # IoP API Client
//!
//! Typed operations against the monitor server, wrapping the network
//! client with the endpoint paths, JSON envelopes and payload
//! validation. This layer never invents success from a non-2xx response
//! and never mutates persistent state — classification comes back to the
//! event loop, which owns the policy.
//!
//! `setup` also arms the two schedulers that bridge asynchronous events
//! into the interrupt queue: the upgrade hook (`MustUpgrade`) and the
//! WiFi-connected hook (`OnConnection`).

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

#[cfg(test)]
extern crate std;

pub mod json;

use serde::Serialize;

use iop_common::interrupt::{schedule_interrupt, InterruptEvent};
use iop_common::log::{LogLevel, Logger};
use iop_common::panic::PanicData;
use iop_common::AuthToken;
use iop_hal::certs::CertificateBundle;
use iop_hal::http::OtaOutcome;
use iop_hal::sensors::Reading;
use iop_hal::traits::{Platform, WifiInterface as _};
use iop_network::{Network, NetworkStatus, RawStatus, Response, UpgradeHook};

pub use json::{make_json, Json, JSON_CAPACITY};

/// Current version of the iop-api library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result of an upgrade attempt. Its own type, not a [`NetworkStatus`]:
/// the loop keeps the token on `Failed(Forbidden)` during upgrades,
/// and that distinction deserves a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    /// Image installed. On real hardware the device reboots before this
    /// value is ever observed.
    Updated,
    NoUpdate,
    Failed(NetworkStatus),
}

fn upgrade_scheduler() {
    schedule_interrupt(InterruptEvent::MustUpgrade);
}

fn on_wifi_connect() {
    schedule_interrupt(InterruptEvent::OnConnection);
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct PanicBody<'a> {
    file: &'a str,
    line: u32,
    func: &'a str,
    msg: &'a str,
}

/// The typed endpoint surface.
pub struct Api {
    network: Network,
    logger: Logger,
}

impl Api {
    pub const fn new(uri: &'static str, level: LogLevel) -> Self {
        Self {
            network: Network::new(uri, level),
            logger: Logger::new(level, "API"),
        }
    }

    /// Attaches the TLS trust-anchor bundle to the underlying client.
    pub const fn with_certificates(uri: &'static str, level: LogLevel, bundle: &'static CertificateBundle) -> Self {
        Self {
            network: Network::new(uri, level).with_certificates(bundle),
            logger: Logger::new(level, "API"),
        }
    }

    /// Arms the interrupt schedulers and prepares the transport.
    pub fn setup<P: Platform>(&mut self, platform: &mut P) {
        platform.wifi().on_connect(on_wifi_connect);
        // If we are already connected the callback won't be called
        if platform.wifi().is_connected() {
            schedule_interrupt(InterruptEvent::OnConnection);
        }

        iop_network::set_upgrade_hook(UpgradeHook::new(upgrade_scheduler));

        self.network.setup(platform);
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    fn status_of(&self, context: &'static str, result: Result<Response, i32>) -> NetworkStatus {
        match result {
            Ok(response) => response.status,
            Err(code) => {
                self.logger.error_fmt(format_args!(
                    "Unexpected response at {}: {}",
                    context, code
                ));
                NetworkStatus::BrokenServer
            }
        }
    }

    /// Exchanges IoP account credentials for a device token.
    ///
    /// Empty credentials are refused locally as `Forbidden` without a
    /// request. An `Ok` response must carry exactly 64 printable bytes;
    /// anything else is a broken server. Nothing here touches the
    /// persistent store — the caller decides what to do with the token.
    pub fn authenticate<P: Platform>(
        &self,
        platform: &mut P,
        email: &str,
        password: &str,
    ) -> Result<AuthToken, NetworkStatus> {
        self.logger
            .info_fmt(format_args!("Authenticate IoP user: {}", email));

        if email.is_empty() || password.is_empty() {
            self.logger.warn("Empty email or password");
            return Err(NetworkStatus::Forbidden);
        }

        let Some(body) = make_json(&self.logger, "Api::authenticate", &LoginBody { email, password })
        else {
            return Err(NetworkStatus::BrokenClient);
        };

        let result = self
            .network
            .http_post_anonymous(platform, "/v1/user/login", &body);
        let response = match result {
            Ok(response) => response,
            Err(code) => {
                self.logger.error_fmt(format_args!(
                    "Unexpected response at Api::authenticate: {}",
                    code
                ));
                return Err(NetworkStatus::BrokenServer);
            }
        };

        if response.status != NetworkStatus::Ok {
            return Err(response.status);
        }

        let payload = response.payload.unwrap_or_default();
        if payload.is_empty() {
            self.logger.error("Server answered OK, but payload is missing");
            return Err(NetworkStatus::BrokenServer);
        }

        match AuthToken::from_bytes(&payload) {
            Some(token) => Ok(token),
            None => {
                self.logger.error_fmt(format_args!(
                    "Auth token is not 64 printable bytes: size = {}",
                    payload.len()
                ));
                Err(NetworkStatus::BrokenServer)
            }
        }
    }

    /// Serializes a sensor reading into the event envelope.
    pub fn make_event_json(&self, reading: &Reading) -> Option<Json> {
        make_json(&self.logger, "Api::make_event_json", reading)
    }

    /// Posts an already-serialized event envelope.
    pub fn register_event<P: Platform>(
        &self,
        platform: &mut P,
        token: &AuthToken,
        event: &Json,
    ) -> NetworkStatus {
        self.logger.info("Send event");
        let result = self.network.http_post(platform, token, "/v1/event", event);
        self.status_of("Api::registerEvent", result)
    }

    /// Reports a panic, halving the message until the envelope fits.
    ///
    /// The attempt count is bounded by `ceil(log2(len)) + 1` halvings;
    /// when even an empty message cannot fit the envelope, the client
    /// itself is broken.
    pub fn report_panic<P: Platform>(
        &self,
        platform: &mut P,
        token: &AuthToken,
        panic: &PanicData<'_>,
    ) -> NetworkStatus {
        self.logger
            .info_fmt(format_args!("Report panic: {}", panic.msg));

        let mut msg = panic.msg;
        let body = loop {
            let attempt = make_json(
                &self.logger,
                "Api::reportPanic",
                &PanicBody {
                    file: panic.file,
                    line: panic.line,
                    func: panic.func,
                    msg,
                },
            );
            if let Some(body) = attempt {
                break body;
            }
            if msg.is_empty() {
                self.logger.crit("Panic report does not fit an empty envelope");
                return NetworkStatus::BrokenClient;
            }
            msg = truncate_at_boundary(msg, msg.len() / 2);
        };

        let result = self.network.http_post(platform, token, "/v1/panic", &body);
        self.status_of("Api::reportPanic", result)
    }

    /// Ships a log line as a raw text body.
    pub fn register_log<P: Platform>(
        &self,
        platform: &mut P,
        token: &AuthToken,
        text: &str,
    ) -> NetworkStatus {
        self.logger.debug("Register log");
        let result = self
            .network
            .http_post(platform, token, "/v1/log", text.as_bytes());
        self.status_of("Api::registerLog", result)
    }

    /// Asks the server for a newer firmware image. Does not return when
    /// an image is installed on real hardware.
    pub fn upgrade<P: Platform>(&self, platform: &mut P, token: &AuthToken) -> UpgradeStatus {
        self.logger.info("Upgrading firmware image");
        match self.network.upgrade(platform, "/v1/update", token) {
            OtaOutcome::Updated => UpgradeStatus::Updated,
            OtaOutcome::NoUpdate => UpgradeStatus::NoUpdate,
            OtaOutcome::Failed(code) => {
                let raw = RawStatus::from_code(code);
                match raw.api_status() {
                    Some(status) => UpgradeStatus::Failed(status),
                    None => {
                        self.logger
                            .warn_fmt(format_args!("Unknown upgrade failure: {}", code));
                        UpgradeStatus::Failed(NetworkStatus::BrokenServer)
                    }
                }
            }
        }
    }
}

/// Cuts `msg` to at most `len` bytes, backing up to a char boundary so
/// the result stays valid UTF-8.
fn truncate_at_boundary(msg: &str, len: usize) -> &str {
    let mut end = len.min(msg.len());
    while end > 0 && !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}
