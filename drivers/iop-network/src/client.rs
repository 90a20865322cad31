//! # Request Engine
//!
//! The one place a request happens. Checks the link, opens the session,
//! decorates it (authorization, content type, telemetry), sends once,
//! watches for the upgrade header, enforces the payload cap and
//! classifies the outcome.

use heapless::{String, Vec};

use iop_common::log::{LogLevel, Logger};
use iop_common::{iop_assert, AuthToken};
use iop_hal::certs::CertificateBundle;
use iop_hal::http::{HttpClientInterface, HttpMethod, HttpSessionInterface, OtaOutcome};
use iop_hal::traits::{DeviceInterface as _, Platform, WifiInterface as _, WifiMode};

use crate::hook;
use crate::status::{NetworkStatus, RawStatus};
use crate::telemetry::Telemetry;

/// Per-request timeout applied to the transport at setup.
pub const DEFAULT_TIMEOUT_MS: u32 = 60_000;

/// Responses declaring more than this many body bytes are discarded and
/// classified `BrokenServer`.
pub const MAX_PAYLOAD_SIZE: usize = 2048;

/// Response headers the transport collects for us.
static COLLECTED_HEADERS: [&str; 1] = ["LATEST_VERSION"];

/// Classified response. The payload is present only when the exchange
/// completed within the size cap.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: NetworkStatus,
    pub payload: Option<Vec<u8, MAX_PAYLOAD_SIZE>>,
}

impl Response {
    pub fn new(status: NetworkStatus) -> Self {
        Self { status, payload: None }
    }

    pub fn with_payload(status: NetworkStatus, payload: Vec<u8, MAX_PAYLOAD_SIZE>) -> Self {
        Self {
            status,
            payload: Some(payload),
        }
    }
}

/// The HTTP(S) client for the configured base URI.
pub struct Network {
    uri: &'static str,
    logger: Logger,
    certificates: Option<&'static CertificateBundle>,
    configured: bool,
}

impl Network {
    pub const fn new(uri: &'static str, level: LogLevel) -> Self {
        Self {
            uri,
            logger: Logger::new(level, "NETWORK"),
            certificates: None,
            configured: false,
        }
    }

    /// Attaches the trust-anchor bundle; without one the transport
    /// speaks plain HTTP (TLS-disabled builds).
    pub const fn with_certificates(mut self, bundle: &'static CertificateBundle) -> Self {
        self.certificates = Some(bundle);
        self
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }

    /// Idempotent transport preparation. Panics when the base URI lacks
    /// a scheme — a build configuration bug, not a runtime condition.
    pub fn setup<P: Platform>(&mut self, platform: &mut P) {
        if self.configured {
            return;
        }
        self.configured = true;

        iop_assert!(
            self.uri.contains("://"),
            "Base URI must contain a scheme (http:// or https://)"
        );

        let http = platform.http();
        http.collect_headers(&COLLECTED_HEADERS);
        http.set_timeout_ms(DEFAULT_TIMEOUT_MS);
        if let Some(bundle) = self.certificates {
            http.install_certificates(bundle);
        }
        platform.wifi().set_mode(WifiMode::Station);
    }

    pub fn http_post<P: Platform>(
        &self,
        platform: &mut P,
        token: &AuthToken,
        path: &'static str,
        data: &[u8],
    ) -> Result<Response, i32> {
        self.http_request(platform, HttpMethod::Post, Some(token.as_str()), path, Some(data))
    }

    pub fn http_post_anonymous<P: Platform>(
        &self,
        platform: &mut P,
        path: &'static str,
        data: &[u8],
    ) -> Result<Response, i32> {
        self.http_request(platform, HttpMethod::Post, None, path, Some(data))
    }

    pub fn http_put<P: Platform>(
        &self,
        platform: &mut P,
        token: &AuthToken,
        path: &'static str,
        data: &[u8],
    ) -> Result<Response, i32> {
        self.http_request(platform, HttpMethod::Put, Some(token.as_str()), path, Some(data))
    }

    /// The underlying primitive all typed endpoints go through.
    pub fn http_request<P: Platform>(
        &self,
        platform: &mut P,
        method: HttpMethod,
        token: Option<&str>,
        path: &'static str,
        data: Option<&[u8]>,
    ) -> Result<Response, i32> {
        if !platform.wifi().is_connected() {
            return Ok(Response::new(NetworkStatus::ConnectionIssues));
        }

        // Snapshot device state before the session borrow opens
        let telemetry = Telemetry::gather(platform);

        let mut uri: String<128> = String::new();
        let _ = uri.push_str(self.uri);
        let _ = uri.push_str(path);

        self.logger
            .info_fmt(format_args!("[{}] {}", method.as_str(), path));

        let Some(mut session) = platform.http().begin(uri.as_str()) else {
            self.logger
                .warn_fmt(format_args!("Failed to begin http connection to {}", uri));
            return Ok(Response::new(NetworkStatus::ConnectionIssues));
        };

        if let Some(token) = token {
            // The session applies the literal "Basic " prefix
            session.set_authorization(token);
        }
        if data.is_some() {
            // Currently only JSON bodies exist
            session.add_header("Content-Type", "application/json");
        }
        telemetry.apply(&mut session, self.uri);

        let sent = session.send(method, data.unwrap_or(&[]));

        let response = match sent {
            Err(code) => {
                let raw = RawStatus::from_code(code);
                return match raw.api_status() {
                    Some(status) => {
                        self.logger.warn_fmt(format_args!(
                            "Request failed ({}): {}",
                            code,
                            raw.name()
                        ));
                        Ok(Response::new(status))
                    }
                    None => {
                        self.logger
                            .warn_fmt(format_args!("Unknown transport code: {}", code));
                        Err(code)
                    }
                };
            }
            Ok(response) => response,
        };

        // Handle system upgrade request: a LATEST_VERSION different from
        // the running image schedules an upgrade, at most once per request
        if let Some(latest) = response.header("LATEST_VERSION") {
            if !latest.is_empty() && latest.as_bytes() != telemetry.version.as_bytes() {
                self.logger.info("Scheduled upgrade");
                hook::run_upgrade_hook();
            }
        }

        let raw = RawStatus::from_code(i32::from(response.code));
        self.logger.debug_fmt(format_args!(
            "Response code ({}): {}",
            response.code,
            raw.name()
        ));

        // Size cap on the declared length, before the body is interpreted
        if response.content_length > MAX_PAYLOAD_SIZE {
            self.logger.error_fmt(format_args!(
                "Payload from server was too big: {}",
                response.content_length
            ));
            return Ok(Response::new(NetworkStatus::BrokenServer));
        }

        match raw.api_status() {
            Some(status) => {
                if status == NetworkStatus::BrokenServer {
                    self.logger.error("Server is broken");
                }
                Ok(Response::with_payload(status, response.payload))
            }
            None => {
                self.logger
                    .warn_fmt(format_args!("Unknown response code: {}", response.code));
                Err(i32::from(response.code))
            }
        }
    }

    /// Streams and installs a firmware image through the dedicated OTA
    /// transport path (no payload cap). Does not return on success on
    /// real hardware.
    pub fn upgrade<P: Platform>(
        &self,
        platform: &mut P,
        path: &'static str,
        token: &AuthToken,
    ) -> OtaOutcome {
        if !platform.wifi().is_connected() {
            return OtaOutcome::Failed(iop_hal::http::codes::CONNECTION_LOST);
        }

        let mut uri: String<128> = String::new();
        let _ = uri.push_str(self.uri);
        let _ = uri.push_str(path);

        let version = platform.device().firmware_hash();
        self.logger.info("Upgrading firmware");
        platform
            .http()
            .ota_update(uri.as_str(), token.as_str(), version.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::UpgradeHook;
    use iop_common::interrupt::{deschedule_interrupt, schedule_interrupt, InterruptEvent};
    use iop_hal::http::SessionResponse;
    use iop_hal::mock::MockPlatform;
    use iop_hal::traits::StationStatus;
    use serial_test::serial;
    use std::vec;

    fn connected_platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform.wifi.set_status(StationStatus::GotIp);
        platform
    }

    fn network() -> Network {
        Network::new("https://api.internet-of-plants.example", LogLevel::NoLog)
    }

    fn token() -> AuthToken {
        AuthToken::from_bytes(&[b'T'; 64]).unwrap()
    }

    fn drain_interrupts() {
        while deschedule_interrupt() != InterruptEvent::None {}
    }

    #[test]
    fn link_down_short_circuits_to_connection_issues() {
        let mut platform = MockPlatform::new();
        let net = network();
        let response = net
            .http_post(&mut platform, &token(), "/v1/event", b"{}")
            .unwrap();
        assert_eq!(response.status, NetworkStatus::ConnectionIssues);
        assert!(platform.http.requests.is_empty());
    }

    #[test]
    fn failed_session_open_is_connection_issues() {
        let mut platform = connected_platform();
        platform.http.begin_fails = true;
        let response = network()
            .http_post(&mut platform, &token(), "/v1/event", b"{}")
            .unwrap();
        assert_eq!(response.status, NetworkStatus::ConnectionIssues);
    }

    #[test]
    fn every_request_carries_the_full_header_set() {
        let mut platform = connected_platform();
        let response = network()
            .http_post(&mut platform, &token(), "/v1/event", b"{}")
            .unwrap();
        assert_eq!(response.status, NetworkStatus::Ok);

        let request = platform.http.last_request().unwrap();
        for name in [
            "MAC_ADDRESS",
            "VERSION",
            "FREE_STACK",
            "FREE_DRAM",
            "BIGGEST_DRAM_BLOCK",
            "FREE_IRAM",
            "BIGGEST_IRAM_BLOCK",
            "VCC",
            "TIME_RUNNING",
            "ORIGIN",
            "DRIVER",
        ] {
            assert!(request.header(name).is_some(), "missing header {}", name);
        }
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(
            request.header("ORIGIN"),
            Some("https://api.internet-of-plants.example")
        );
    }

    #[test]
    fn authorization_uses_the_basic_prefix() {
        let mut platform = connected_platform();
        let _ = network().http_post(&mut platform, &token(), "/v1/event", b"{}");
        let request = platform.http.last_request().unwrap();
        let auth = request.authorization.as_ref().unwrap();
        assert!(auth.starts_with("Basic "));
        assert!(auth.ends_with(core::str::from_utf8(&[b'T'; 64]).unwrap()));
    }

    #[test]
    fn anonymous_post_has_no_authorization() {
        let mut platform = connected_platform();
        let _ = network().http_post_anonymous(&mut platform, "/v1/user/login", b"{}");
        let request = platform.http.last_request().unwrap();
        assert!(request.authorization.is_none());
    }

    #[test]
    fn requests_without_body_skip_content_type() {
        let mut platform = connected_platform();
        let _ = network().http_request(
            &mut platform,
            HttpMethod::Get,
            Some(token().as_str()),
            "/v1/update",
            None,
        );
        let request = platform.http.last_request().unwrap();
        assert!(request.header("Content-Type").is_none());
    }

    #[test]
    fn status_mapping_follows_the_table() {
        let cases = [
            (200, NetworkStatus::Ok),
            (403, NetworkStatus::Forbidden),
            (500, NetworkStatus::BrokenServer),
        ];
        for (code, expected) in cases {
            let mut platform = connected_platform();
            platform
                .http
                .push_response(Ok(SessionResponse::new(code, b"")));
            let response = network()
                .http_post(&mut platform, &token(), "/v1/event", b"{}")
                .unwrap();
            assert_eq!(response.status, expected, "code {}", code);
        }
    }

    #[test]
    fn transport_errors_map_to_connection_issues() {
        let mut platform = connected_platform();
        platform
            .http
            .push_response(Err(iop_hal::http::codes::READ_TIMEOUT));
        let response = network()
            .http_post(&mut platform, &token(), "/v1/event", b"{}")
            .unwrap();
        assert_eq!(response.status, NetworkStatus::ConnectionIssues);
    }

    #[test]
    fn unknown_codes_bubble_as_raw_integers() {
        let mut platform = connected_platform();
        platform
            .http
            .push_response(Ok(SessionResponse::new(418, b"")));
        let result = network().http_post(&mut platform, &token(), "/v1/event", b"{}");
        assert_eq!(result.unwrap_err(), 418);
    }

    #[test]
    fn oversized_declared_length_is_broken_server_with_no_payload() {
        let mut platform = connected_platform();
        platform.http.push_response(Ok(
            SessionResponse::new(200, b"partial").with_content_length(4096)
        ));
        let response = network()
            .http_post(&mut platform, &token(), "/v1/event", b"{}")
            .unwrap();
        assert_eq!(response.status, NetworkStatus::BrokenServer);
        assert!(response.payload.is_none());
    }

    fn schedule_upgrade() {
        schedule_interrupt(InterruptEvent::MustUpgrade);
    }

    #[test]
    #[serial]
    fn differing_latest_version_fires_the_hook_once() {
        drain_interrupts();
        crate::hook::set_upgrade_hook(UpgradeHook::new(schedule_upgrade));

        let mut platform = connected_platform();
        platform.http.push_response(Ok(SessionResponse::new(200, b"")
            .with_header("LATEST_VERSION", core::str::from_utf8(&[b'B'; 32]).unwrap())));

        let _ = network().http_post(&mut platform, &token(), "/v1/event", b"{}");

        assert_eq!(deschedule_interrupt(), InterruptEvent::MustUpgrade);
        assert_eq!(deschedule_interrupt(), InterruptEvent::None);
        let _ = crate::hook::take_upgrade_hook();
    }

    #[test]
    #[serial]
    fn matching_latest_version_does_not_fire_the_hook() {
        drain_interrupts();
        crate::hook::set_upgrade_hook(UpgradeHook::new(schedule_upgrade));

        let mut platform = connected_platform();
        let running = platform.device.firmware_hash();
        platform.http.push_response(
            Ok(SessionResponse::new(200, b"").with_header("LATEST_VERSION", running.as_str())),
        );

        let _ = network().http_post(&mut platform, &token(), "/v1/event", b"{}");

        assert_eq!(deschedule_interrupt(), InterruptEvent::None);
        let _ = crate::hook::take_upgrade_hook();
    }

    #[test]
    fn setup_prepares_the_transport_once() {
        let mut platform = MockPlatform::new();
        let mut net = network();
        net.setup(&mut platform);
        assert!(platform.http.collected.contains(&"LATEST_VERSION"));
        assert_eq!(platform.http.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(platform.wifi.mode(), WifiMode::Station);

        let mode_changes = platform.wifi.mode_changes.len();
        net.setup(&mut platform);
        assert_eq!(platform.wifi.mode_changes.len(), mode_changes);
    }

    #[test]
    fn upgrade_uses_the_dedicated_ota_path() {
        let mut platform = connected_platform();
        platform.http.ota_outcome = OtaOutcome::NoUpdate;
        let outcome = network().upgrade(&mut platform, "/v1/update", &token());
        assert_eq!(outcome, OtaOutcome::NoUpdate);
        assert_eq!(platform.http.ota_calls.len(), 1);
        assert!(platform.http.ota_calls[0].0.as_str().ends_with("/v1/update"));
        // The regular request log stays empty
        assert!(platform.http.requests.is_empty());
    }
}
