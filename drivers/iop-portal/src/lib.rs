//! # IoP Captive Portal
//!
//! When the device has no way to reach its owner's network or no token
//! for the monitor server, it becomes the network: an access point at a
//! fixed address, a DNS server that answers every query with that
//! address, and one HTML form collecting WiFi and IoP credentials.
//!
//! The portal is driven by the event loop's cadence — each `serve` call
//! services at most one HTTP request and one DNS query, then acts on
//! whatever credentials have arrived: WiFi pairs trigger a station
//! connect, IoP pairs (once the station is up) are exchanged for an auth
//! token which is returned to the loop.

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

pub mod form;
pub mod html;

use heapless::String;

use iop_api::Api;
use iop_common::log::{LogLevel, Logger};
use iop_common::utils::scape_non_printable;
use iop_common::{iop_assert, iop_panic, AuthToken};
use iop_hal::http::{DnsInterface as _, HttpServerInterface as _, ServerRequest};
use iop_hal::traits::{Platform, StationStatus, TimeInterface as _, WifiInterface as _, WifiMode};
use iop_network::NetworkStatus;

use form::parse_form;

/// Current version of the iop-portal library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static address of the access point and of every DNS answer.
pub const PORTAL_IP: [u8; 4] = [192, 168, 1, 1];
pub const PORTAL_NETMASK: [u8; 4] = [255, 255, 255, 0];
pub const HTTP_PORT: u16 = 80;
pub const DNS_PORT: u16 = 53;

/// The provisioning server.
pub struct CredentialsServer {
    logger: Logger,
    is_open: bool,
    ap_ssid: Option<String<32>>,
    ap_password: Option<String<64>>,
    pending_wifi: Option<(String<32>, String<64>)>,
    pending_iop: Option<(String<64>, String<64>)>,
}

impl CredentialsServer {
    pub const fn new(level: LogLevel) -> Self {
        Self {
            logger: Logger::new(level, "SERVER"),
            is_open: false,
            ap_ssid: None,
            ap_password: None,
            pending_wifi: None,
            pending_iop: None,
        }
    }

    /// Must be called before the first `serve`; the AP cannot come up
    /// without its own credentials.
    pub fn set_access_point_credentials(&mut self, ssid: &str, password: &str) {
        self.ap_ssid = Some(String::try_from(ssid).unwrap_or_default());
        self.ap_password = Some(String::try_from(password).unwrap_or_default());
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    fn start<P: Platform>(&mut self, platform: &mut P) {
        if self.is_open {
            return;
        }
        self.is_open = true;
        self.logger.info("Setting our own wifi access point");

        iop_assert!(
            self.ap_ssid.is_some() && self.ap_password.is_some(),
            "Access point credentials must be set before serving"
        );
        let ssid = self.ap_ssid.as_ref().map(String::as_str).unwrap_or("");
        let password = self.ap_password.as_ref().map(String::as_str).unwrap_or("");

        platform.wifi().set_mode(WifiMode::AccessPointStation);
        platform.time().sleep_ms(1);
        platform
            .wifi()
            .configure_access_point(ssid, password, PORTAL_IP, PORTAL_NETMASK);

        platform.server().bind(HTTP_PORT);
        // Makes it a captive portal (redirects all wifi traffic to it)
        platform.dns().start(DNS_PORT, PORTAL_IP);

        let ip = PORTAL_IP;
        self.logger.info_fmt(format_args!(
            "Opened captive portal: {}.{}.{}.{}",
            ip[0], ip[1], ip[2], ip[3]
        ));
    }

    /// Tears down the AP, servers and pending state. Returns whether
    /// the portal was open.
    pub fn close<P: Platform>(&mut self, platform: &mut P) -> bool {
        if !self.is_open {
            return false;
        }
        self.logger.debug("Closing captive portal");
        self.is_open = false;
        self.pending_wifi = None;
        self.pending_iop = None;

        platform.dns().stop();
        platform.server().close();
        platform.wifi().set_mode(WifiMode::Station);
        platform.time().sleep_ms(1);
        true
    }

    /// One provisioning round: ensure the portal is up, service one
    /// HTTP request and one DNS query, then act on collected
    /// credentials. `has_token` selects the page variant (the portal
    /// itself does not read the store).
    pub fn serve<P: Platform>(
        &mut self,
        platform: &mut P,
        api: &Api,
        has_token: bool,
    ) -> Option<AuthToken> {
        self.start(platform);

        if let Some(request) = platform.server().next_request() {
            self.handle_request(platform, request, has_token);
        }
        platform.dns().process_next_request();

        if let Some((ssid, password)) = self.pending_wifi.take() {
            self.connect(platform, ssid.as_str().as_bytes(), password.as_str().as_bytes());
        } else if platform.wifi().is_connected() {
            if let Some((email, password)) = self.pending_iop.take() {
                return self.authenticate(platform, api, email.as_str(), password.as_str());
            }
        }
        None
    }

    fn handle_request<P: Platform>(
        &mut self,
        platform: &mut P,
        request: ServerRequest,
        has_token: bool,
    ) {
        match request {
            ServerRequest::Post { path, body } if path.as_str() == "/submit" => {
                self.logger.debug("Received form with credentials");
                let submission = parse_form(&body);
                if submission.wifi.is_some() {
                    self.pending_wifi = submission.wifi;
                }
                if submission.iop.is_some() {
                    self.pending_iop = submission.iop;
                }
                platform.server().redirect("/");
            }
            // Everything else gets the captive portal page
            ServerRequest::Get { .. } | ServerRequest::Post { .. } => {
                self.logger.debug("Serving captive portal HTML");
                let must_connect = !platform.wifi().is_connected();
                let needs_iop_auth = !has_token;

                let wifi_part = if must_connect {
                    html::WIFI_HTML
                } else {
                    html::WIFI_OVERWRITE_HTML
                };
                let iop_part = if needs_iop_auth {
                    html::IOP_HTML
                } else {
                    html::IOP_OVERWRITE_HTML
                };

                platform.server().respond_html(
                    200,
                    &[html::PAGE_START, wifi_part, iop_part, html::PAGE_END],
                );
            }
        }
    }

    /// Station connect with the radio quirks handled: a connect already
    /// in flight is torn down under the interrupt lock first, and the
    /// final station status is logged when the credentials were bad.
    pub fn connect<P: Platform>(&self, platform: &mut P, ssid: &[u8], password: &[u8]) {
        self.logger
            .info_fmt(format_args!("Connect: {}", scape_non_printable(ssid)));

        if platform.wifi().status() == StationStatus::Connecting {
            let wifi = platform.wifi();
            critical_section::with(|_| wifi.disconnect());
        }

        if !platform.wifi().begin(ssid, password) {
            self.logger.error("Wifi authentication timed out");
            return;
        }

        if !platform.wifi().is_connected() {
            let status = platform.wifi().status();
            self.logger.error_fmt(format_args!(
                "Invalid wifi credentials ({}): {}",
                status.name(),
                scape_non_printable(ssid)
            ));
        }
    }

    /// Forbidden (403) means invalid credentials; transient classes are
    /// retried on a later portal round. The radio is flipped to pure
    /// station mode for the exchange and back to AP+STA after.
    fn authenticate<P: Platform>(
        &self,
        platform: &mut P,
        api: &Api,
        email: &str,
        password: &str,
    ) -> Option<AuthToken> {
        platform.wifi().set_mode(WifiMode::Station);
        let result = api.authenticate(platform, email, password);
        platform.wifi().set_mode(WifiMode::AccessPointStation);
        self.logger.info("Tried to authenticate");

        match result {
            Ok(token) => Some(token),
            Err(NetworkStatus::Forbidden) => {
                self.logger
                    .error_fmt(format_args!("Invalid IoP credentials: {}", email));
                None
            }
            Err(NetworkStatus::ConnectionIssues) => None,
            Err(NetworkStatus::BrokenServer) => {
                self.logger.error("Authentication hit a broken server");
                None
            }
            Err(NetworkStatus::BrokenClient) => {
                iop_panic!("CredentialsServer::authenticate internal buffer overflow")
            }
            // Success returns a token, not a status
            Err(NetworkStatus::Ok) => iop_panic!("Unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_hal::http::SessionResponse;
    use iop_hal::mock::MockPlatform;

    fn portal() -> CredentialsServer {
        let mut server = CredentialsServer::new(LogLevel::NoLog);
        server.set_access_point_credentials("iop-4242", "le$memester#passwordz");
        server
    }

    fn api() -> Api {
        Api::new("https://api.internet-of-plants.example", LogLevel::NoLog)
    }

    #[test]
    fn serve_opens_ap_http_and_dns_once() {
        let mut platform = MockPlatform::new();
        let mut portal = portal();

        let _ = portal.serve(&mut platform, &api(), false);
        assert!(portal.is_open());
        assert_eq!(platform.server.bound, Some(HTTP_PORT));
        assert_eq!(platform.dns.started, Some((DNS_PORT, PORTAL_IP)));
        assert_eq!(platform.wifi.mode(), WifiMode::AccessPointStation);

        let (ssid, _, ip, mask) = platform.wifi.ap_config.clone().unwrap();
        assert_eq!(ssid.as_str(), "iop-4242");
        assert_eq!(ip, PORTAL_IP);
        assert_eq!(mask, PORTAL_NETMASK);

        // A second round does not rebind
        let dns_starts = platform.dns.started;
        let _ = portal.serve(&mut platform, &api(), false);
        assert_eq!(platform.dns.started, dns_starts);
    }

    #[test]
    fn every_serve_round_services_dns() {
        let mut platform = MockPlatform::new();
        let mut portal = portal();
        let _ = portal.serve(&mut platform, &api(), false);
        let _ = portal.serve(&mut platform, &api(), false);
        assert_eq!(platform.dns.processed, 2);
    }

    #[test]
    fn page_variant_tracks_connection_and_token_state() {
        let cases = [
            (false, false, html::WIFI_HTML, html::IOP_HTML),
            (false, true, html::WIFI_HTML, html::IOP_OVERWRITE_HTML),
            (true, false, html::WIFI_OVERWRITE_HTML, html::IOP_HTML),
            (true, true, html::WIFI_OVERWRITE_HTML, html::IOP_OVERWRITE_HTML),
        ];
        for (connected, has_token, wifi_part, iop_part) in cases {
            let mut platform = MockPlatform::new();
            if connected {
                platform.wifi.set_status(iop_hal::traits::StationStatus::GotIp);
            }
            platform.server.push_request(ServerRequest::get("/"));
            let mut portal = portal();
            // Pre-open so the queued request is seen this round
            let _ = portal.serve(&mut platform, &api(), has_token);

            let (status, page) = platform.server.responses.last().unwrap();
            assert_eq!(*status, 200);
            assert!(page.as_str().starts_with(html::PAGE_START));
            assert!(page.as_str().contains(wifi_part));
            assert!(page.as_str().contains(iop_part));
            assert!(page.as_str().ends_with(html::PAGE_END));
        }
    }

    #[test]
    fn wifi_submission_redirects_and_connects_same_round() {
        let mut platform = MockPlatform::new();
        platform.server.push_request(ServerRequest::post(
            "/submit",
            b"ssid=plants&password=hunter2",
        ));

        let mut portal = portal();
        let token = portal.serve(&mut platform, &api(), false);
        assert!(token.is_none());

        assert_eq!(platform.server.redirects.last().unwrap().as_str(), "/");
        assert_eq!(platform.wifi.begin_calls.len(), 1);
        let (ssid, password) = &platform.wifi.begin_calls[0];
        assert_eq!(&ssid[..], b"plants");
        assert_eq!(&password[..], b"hunter2");
    }

    #[test]
    fn iop_submission_authenticates_once_connected() {
        let mut platform = MockPlatform::new();
        platform.wifi.set_status(iop_hal::traits::StationStatus::GotIp);
        platform
            .http
            .push_response(Ok(SessionResponse::new(200, &[b'X'; 64])));
        platform.server.push_request(ServerRequest::post(
            "/submit",
            b"iopEmail=a%40b&iopPassword=p",
        ));

        let mut portal = portal();
        let token = portal.serve(&mut platform, &api(), false);
        assert_eq!(token, AuthToken::from_bytes(&[b'X'; 64]));

        // The exchange happened in pure station mode, then back to AP+STA
        let changes = &platform.wifi.mode_changes;
        let station_idx = changes
            .iter()
            .rposition(|mode| *mode == WifiMode::Station)
            .unwrap();
        assert_eq!(changes.last(), Some(&WifiMode::AccessPointStation));
        assert!(station_idx < changes.len() - 1);

        let request = platform.http.last_request().unwrap();
        assert_eq!(request.path(), "/v1/user/login");
    }

    #[test]
    fn iop_submission_waits_for_connection() {
        let mut platform = MockPlatform::new();
        platform.server.push_request(ServerRequest::post(
            "/submit",
            b"iopEmail=a%40b&iopPassword=p",
        ));

        let mut portal = portal();
        assert!(portal.serve(&mut platform, &api(), false).is_none());
        // Nothing sent while offline; the pair stays pending
        assert!(platform.http.requests.is_empty());

        platform.wifi.set_status(iop_hal::traits::StationStatus::GotIp);
        platform
            .http
            .push_response(Ok(SessionResponse::new(200, &[b'Y'; 64])));
        let token = portal.serve(&mut platform, &api(), false);
        assert_eq!(token, AuthToken::from_bytes(&[b'Y'; 64]));
    }

    #[test]
    fn forbidden_credentials_return_nothing() {
        let mut platform = MockPlatform::new();
        platform.wifi.set_status(iop_hal::traits::StationStatus::GotIp);
        platform.http.push_response(Ok(SessionResponse::new(403, b"")));
        platform.server.push_request(ServerRequest::post(
            "/submit",
            b"iopEmail=bad%40b&iopPassword=wrong",
        ));

        let mut portal = portal();
        assert!(portal.serve(&mut platform, &api(), false).is_none());
    }

    #[test]
    fn close_tears_down_and_reports_prior_state() {
        let mut platform = MockPlatform::new();
        let mut portal = portal();

        assert!(!portal.close(&mut platform));

        let _ = portal.serve(&mut platform, &api(), false);
        assert!(portal.close(&mut platform));
        assert!(!portal.is_open());
        assert_eq!(platform.server.bound, None);
        assert_eq!(platform.dns.started, None);
        assert_eq!(platform.wifi.mode(), WifiMode::Station);

        assert!(!portal.close(&mut platform));
    }

    #[test]
    fn connect_tears_down_inflight_attempts_first() {
        let mut platform = MockPlatform::new();
        platform.wifi.set_status(iop_hal::traits::StationStatus::Connecting);

        portal().connect(&mut platform, b"net", b"psk");
        assert_eq!(platform.wifi.disconnects, 1);
        assert_eq!(platform.wifi.begin_calls.len(), 1);
    }

    #[test]
    fn connect_logs_timeout_without_panicking() {
        let mut platform = MockPlatform::new();
        platform.wifi.begin_result = false;
        portal().connect(&mut platform, b"net", b"psk");
        assert_eq!(platform.wifi.begin_calls.len(), 1);
    }
}
