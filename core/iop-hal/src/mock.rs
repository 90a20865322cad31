//! # Mock Platform
//!
//! Scriptable in-memory implementation of every hardware trait, used by
//! host tests across the workspace. Operations are recorded in public
//! fields for assertion; network exchanges pop canned responses scripted
//! by the test.
//!
//! ```rust,ignore
//! let mut platform = MockPlatform::new();
//! platform.wifi.set_status(StationStatus::GotIp);
//! platform.http.push_response(Ok(SessionResponse::new(200, &[b'X'; 64])));
//!
//! // ... drive the code under test ...
//!
//! assert_eq!(platform.http.requests.len(), 1);
//! assert_eq!(platform.http.requests[0].path(), "/v1/user/login");
//! ```

use heapless::{String, Vec};

use iop_common::{FirmwareHash, MacAddress, NetworkName, NetworkPassword, WifiCredentials};

use crate::certs::CertificateBundle;
use crate::http::{
    DnsInterface, HttpClientInterface, HttpMethod, HttpServerInterface, HttpSessionInterface,
    OtaOutcome, ServerRequest, SessionResponse,
};
use crate::sensors::{Reading, SensorsInterface};
use crate::traits::{
    DeviceInterface, FlashInterface, GpioInterface, MemoryRegion, PinMode, Platform,
    StationStatus, TimeInterface, WifiInterface, WifiMode,
};

/// Manually-advanced monotonic clock. `sleep_ms` advances it so timed
/// waits in the code under test terminate.
pub struct MockTime {
    now: u64,
    pub sleeps: Vec<u32, 32>,
    pub yields: u32,
}

impl MockTime {
    pub fn new() -> Self {
        Self { now: 0, sleeps: Vec::new(), yields: 0 }
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }
}

impl TimeInterface for MockTime {
    fn now_ms(&self) -> u64 {
        self.now
    }

    fn sleep_ms(&mut self, ms: u32) {
        let _ = self.sleeps.push(ms);
        self.now += u64::from(ms);
    }

    fn yield_now(&mut self) {
        self.yields += 1;
    }
}

/// Device identity with settable firmware hash and telemetry counters.
pub struct MockDevice {
    mac: MacAddress,
    firmware_hash: FirmwareHash,
    pub vcc_mv: u16,
    pub stack_free: u32,
    pub heap_free: u32,
    pub heap_block: u32,
    pub ntp_syncs: u32,
    pub deep_sleeps: Vec<u32, 8>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            mac: MacAddress::from_bytes(b"AA:BB:CC:DD:EE:FF").unwrap_or_else(|| unreachable!()),
            firmware_hash: FirmwareHash::from_bytes(&[b'a'; 32]).unwrap_or_else(|| unreachable!()),
            vcc_mv: 3300,
            stack_free: 4096,
            heap_free: 40_000,
            heap_block: 16_384,
            ntp_syncs: 0,
            deep_sleeps: Vec::new(),
        }
    }

    pub fn set_firmware_hash(&mut self, hash: FirmwareHash) {
        self.firmware_hash = hash;
    }
}

impl DeviceInterface for MockDevice {
    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn firmware_hash(&self) -> FirmwareHash {
        self.firmware_hash
    }

    fn platform(&self) -> &'static str {
        "mock"
    }

    fn vcc(&self) -> u16 {
        self.vcc_mv
    }

    fn available_stack(&self) -> u32 {
        self.stack_free
    }

    fn available_heap(&self, _region: MemoryRegion) -> u32 {
        self.heap_free
    }

    fn biggest_heap_block(&self, _region: MemoryRegion) -> u32 {
        self.heap_block
    }

    fn sync_ntp(&mut self) {
        self.ntp_syncs += 1;
    }

    fn deep_sleep(&mut self, seconds: u32) {
        // Recorded and returns, so tests can observe the sleep tiers
        let _ = self.deep_sleeps.push(seconds);
    }
}

/// Radio with scripted connection outcomes.
pub struct MockWifi {
    status: StationStatus,
    mode: WifiMode,
    credentials: WifiCredentials,
    connect_hook: Option<fn()>,
    /// Recorded `begin` arguments (ssid, password).
    pub begin_calls: Vec<(Vec<u8, 32>, Vec<u8, 64>), 8>,
    /// Whether `begin` reports a result before timing out.
    pub begin_result: bool,
    /// Status the radio adopts after a non-timed-out `begin`.
    pub begin_status: StationStatus,
    /// Fire the registered connect hook when `begin` reaches `GotIp`,
    /// the way the real radio event does.
    pub fire_connect_hook: bool,
    pub disconnects: u32,
    pub reconnects: u32,
    pub mode_changes: Vec<WifiMode, 16>,
    pub ap_config: Option<(String<32>, String<64>, [u8; 4], [u8; 4])>,
    pub ap_result: bool,
    pub station_ip: [u8; 4],
    pub ap_ip: [u8; 4],
}

fn empty_credentials() -> WifiCredentials {
    let ssid = NetworkName::from_slice(&[]).unwrap_or_else(|| unreachable!());
    let password = NetworkPassword::from_slice(&[]).unwrap_or_else(|| unreachable!());
    WifiCredentials::new(ssid, password)
}

impl MockWifi {
    pub fn new() -> Self {
        Self {
            status: StationStatus::Idle,
            mode: WifiMode::Station,
            credentials: empty_credentials(),
            connect_hook: None,
            begin_calls: Vec::new(),
            begin_result: true,
            begin_status: StationStatus::GotIp,
            fire_connect_hook: true,
            disconnects: 0,
            reconnects: 0,
            mode_changes: Vec::new(),
            ap_config: None,
            ap_result: true,
            station_ip: [192, 168, 0, 42],
            ap_ip: [192, 168, 1, 1],
        }
    }

    pub fn set_status(&mut self, status: StationStatus) {
        self.status = status;
    }

    pub fn set_credentials(&mut self, credentials: WifiCredentials) {
        self.credentials = credentials;
    }
}

impl WifiInterface for MockWifi {
    fn status(&self) -> StationStatus {
        self.status
    }

    fn mode(&self) -> WifiMode {
        self.mode
    }

    fn set_mode(&mut self, mode: WifiMode) {
        self.mode = mode;
        let _ = self.mode_changes.push(mode);
    }

    fn begin(&mut self, ssid: &[u8], password: &[u8]) -> bool {
        let mut ssid_buf = Vec::new();
        let _ = ssid_buf.extend_from_slice(&ssid[..ssid.len().min(32)]);
        let mut password_buf = Vec::new();
        let _ = password_buf.extend_from_slice(&password[..password.len().min(64)]);
        let _ = self.begin_calls.push((ssid_buf, password_buf));

        if !self.begin_result {
            return false;
        }
        self.status = self.begin_status;
        if self.status == StationStatus::GotIp {
            if let (Some(name), Some(pass)) = (
                NetworkName::from_slice(&ssid[..ssid.len().min(32)]),
                NetworkPassword::from_slice(&password[..password.len().min(64)]),
            ) {
                self.credentials = WifiCredentials::new(name, pass);
            }
            if self.fire_connect_hook {
                if let Some(hook) = self.connect_hook {
                    hook();
                }
            }
        }
        true
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.status = StationStatus::Idle;
    }

    fn reconnect(&mut self) {
        self.reconnects += 1;
    }

    fn credentials(&self) -> WifiCredentials {
        self.credentials
    }

    fn on_connect(&mut self, hook: fn()) {
        self.connect_hook = Some(hook);
    }

    fn configure_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        ip: [u8; 4],
        netmask: [u8; 4],
    ) -> bool {
        self.ap_config = Some((
            String::try_from(ssid).unwrap_or_default(),
            String::try_from(password).unwrap_or_default(),
            ip,
            netmask,
        ));
        self.ap_result
    }

    fn local_ip(&self) -> [u8; 4] {
        self.station_ip
    }

    fn access_point_ip(&self) -> [u8; 4] {
        self.ap_ip
    }
}

const MOCK_PIN_COUNT: usize = 40;

/// Pin state tracking.
pub struct MockGpio {
    levels: [bool; MOCK_PIN_COUNT],
    pub modes: Vec<(u8, PinMode), 8>,
    pub writes: u32,
    pub handlers: Vec<(u8, fn()), 4>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self {
            levels: [false; MOCK_PIN_COUNT],
            modes: Vec::new(),
            writes: 0,
            handlers: Vec::new(),
        }
    }

    pub fn set_level(&mut self, pin: u8, high: bool) {
        if usize::from(pin) < MOCK_PIN_COUNT {
            self.levels[usize::from(pin)] = high;
        }
    }

    pub fn level(&self, pin: u8) -> bool {
        usize::from(pin) < MOCK_PIN_COUNT && self.levels[usize::from(pin)]
    }
}

impl GpioInterface for MockGpio {
    fn mode(&mut self, pin: u8, mode: PinMode) {
        let _ = self.modes.push((pin, mode));
    }

    fn read(&self, pin: u8) -> bool {
        self.level(pin)
    }

    fn write(&mut self, pin: u8, high: bool) {
        self.writes += 1;
        self.set_level(pin, high);
    }

    fn on_change(&mut self, pin: u8, handler: fn()) {
        let _ = self.handlers.push((pin, handler));
    }
}

/// Backing byte region with write/commit counters, so storage tests can
/// assert flash-wear idempotence.
pub struct MockFlash {
    data: [u8; 512],
    size: usize,
    pub writes: u32,
    pub commits: u32,
    pub fail_writes: bool,
    pub fail_commits: bool,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            data: [0; 512],
            size: 0,
            writes: 0,
            commits: 0,
            fail_writes: false,
            fail_commits: false,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.data[..self.size]
    }
}

impl FlashInterface for MockFlash {
    fn setup(&mut self, size: usize) {
        self.size = size.min(self.data.len());
    }

    fn get(&self, offset: usize) -> Option<u8> {
        if offset < self.size {
            Some(self.data[offset])
        } else {
            None
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(buf.len()) else {
            return false;
        };
        if end > self.size {
            return false;
        }
        buf.copy_from_slice(&self.data[offset..end]);
        true
    }

    fn set(&mut self, offset: usize, byte: u8) -> bool {
        if self.fail_writes || offset >= self.size {
            return false;
        }
        self.writes += 1;
        self.data[offset] = byte;
        true
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        if self.fail_writes || end > self.size {
            return false;
        }
        self.writes += 1;
        self.data[offset..end].copy_from_slice(bytes);
        true
    }

    fn commit(&mut self) -> bool {
        if self.fail_commits {
            return false;
        }
        self.commits += 1;
        true
    }
}

/// Everything the client put into one exchange, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub uri: String<128>,
    pub authorization: Option<String<96>>,
    pub headers: Vec<(&'static str, String<64>), 16>,
    pub body: Vec<u8, 1024>,
}

impl RecordedRequest {
    fn new(uri: &str) -> Self {
        Self {
            method: HttpMethod::Get,
            uri: String::try_from(uri).unwrap_or_default(),
            authorization: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn body_str(&self) -> &str {
        core::str::from_utf8(&self.body).unwrap_or("")
    }

    /// Path component of the request URI.
    pub fn path(&self) -> &str {
        let uri = self.uri.as_str();
        let after_scheme = match uri.find("://") {
            Some(idx) => &uri[idx + 3..],
            None => uri,
        };
        match after_scheme.find('/') {
            Some(idx) => &after_scheme[idx..],
            None => "/",
        }
    }
}

/// HTTP client with recorded requests and scripted responses.
///
/// Responses pop in FIFO order; when the script runs dry every exchange
/// answers 200 with an empty body.
pub struct MockHttp {
    pub requests: Vec<RecordedRequest, 32>,
    responses: Vec<Result<SessionResponse, i32>, 16>,
    pub begin_fails: bool,
    pub collected: Vec<&'static str, 4>,
    pub timeout_ms: u32,
    pub certificates_installed: bool,
    pub ota_calls: Vec<(String<128>, String<96>), 4>,
    pub ota_outcome: OtaOutcome,
}

impl MockHttp {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            responses: Vec::new(),
            begin_fails: false,
            collected: Vec::new(),
            timeout_ms: 0,
            certificates_installed: false,
            ota_calls: Vec::new(),
            ota_outcome: OtaOutcome::NoUpdate,
        }
    }

    /// Queues the response for the next exchange.
    pub fn push_response(&mut self, response: Result<SessionResponse, i32>) {
        let _ = self.responses.push(response);
    }

    pub fn last_request(&self) -> Option<&RecordedRequest> {
        self.requests.last()
    }

    fn pop_response(&mut self) -> Result<SessionResponse, i32> {
        if self.responses.is_empty() {
            Ok(SessionResponse::new(200, b""))
        } else {
            self.responses.remove(0)
        }
    }
}

/// One pending mock exchange.
pub struct MockSession<'a> {
    http: &'a mut MockHttp,
    request: RecordedRequest,
}

impl HttpSessionInterface for MockSession<'_> {
    fn set_authorization(&mut self, token: &str) {
        let mut value: String<96> = String::new();
        let _ = value.push_str("Basic ");
        let _ = value.push_str(token);
        self.request.authorization = Some(value);
    }

    fn add_header(&mut self, name: &'static str, value: &str) {
        let _ = self
            .request
            .headers
            .push((name, String::try_from(value).unwrap_or_default()));
    }

    fn send(&mut self, method: HttpMethod, body: &[u8]) -> Result<SessionResponse, i32> {
        self.request.method = method;
        self.request.body.clear();
        let _ = self.request.body.extend_from_slice(body);
        let _ = self.http.requests.push(self.request.clone());
        self.http.pop_response()
    }
}

impl HttpClientInterface for MockHttp {
    type Session<'a>
        = MockSession<'a>
    where
        Self: 'a;

    fn collect_headers(&mut self, names: &'static [&'static str]) {
        self.collected.clear();
        for name in names {
            let _ = self.collected.push(name);
        }
    }

    fn set_timeout_ms(&mut self, timeout: u32) {
        self.timeout_ms = timeout;
    }

    fn install_certificates(&mut self, _bundle: &'static CertificateBundle) {
        self.certificates_installed = true;
    }

    fn begin(&mut self, uri: &str) -> Option<Self::Session<'_>> {
        if self.begin_fails {
            return None;
        }
        let request = RecordedRequest::new(uri);
        Some(MockSession { http: self, request })
    }

    fn ota_update(&mut self, uri: &str, token: &str, _current_version: &str) -> OtaOutcome {
        let _ = self.ota_calls.push((
            String::try_from(uri).unwrap_or_default(),
            String::try_from(token).unwrap_or_default(),
        ));
        self.ota_outcome
    }
}

/// Portal-facing HTTP server: tests push requests, the portal pops them
/// and responds.
pub struct MockServer {
    pub bound: Option<u16>,
    queue: Vec<ServerRequest, 8>,
    pub responses: Vec<(u16, String<4096>), 4>,
    pub redirects: Vec<String<64>, 4>,
    pub closes: u32,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            bound: None,
            queue: Vec::new(),
            responses: Vec::new(),
            redirects: Vec::new(),
            closes: 0,
        }
    }

    pub fn push_request(&mut self, request: ServerRequest) {
        let _ = self.queue.push(request);
    }
}

impl HttpServerInterface for MockServer {
    fn bind(&mut self, port: u16) {
        self.bound = Some(port);
    }

    fn close(&mut self) {
        self.bound = None;
        self.closes += 1;
    }

    fn next_request(&mut self) -> Option<ServerRequest> {
        if self.bound.is_none() || self.queue.is_empty() {
            return None;
        }
        Some(self.queue.remove(0))
    }

    fn respond_html(&mut self, status: u16, parts: &[&str]) {
        let mut page: String<4096> = String::new();
        for part in parts {
            let _ = page.push_str(part);
        }
        let _ = self.responses.push((status, page));
    }

    fn redirect(&mut self, location: &str) {
        let _ = self
            .redirects
            .push(String::try_from(location).unwrap_or_default());
    }
}

/// DNS hijack server stand-in.
pub struct MockDns {
    pub started: Option<(u16, [u8; 4])>,
    pub stops: u32,
    pub processed: u32,
}

impl MockDns {
    pub fn new() -> Self {
        Self { started: None, stops: 0, processed: 0 }
    }
}

impl DnsInterface for MockDns {
    fn start(&mut self, port: u16, ip: [u8; 4]) {
        self.started = Some((port, ip));
    }

    fn stop(&mut self) {
        self.started = None;
        self.stops += 1;
    }

    fn process_next_request(&mut self) {
        self.processed += 1;
    }
}

/// Sensor bundle returning a scripted reading.
pub struct MockSensors {
    pub reading: Reading,
    pub measures: u32,
    pub setups: u32,
}

impl MockSensors {
    pub fn new() -> Self {
        Self {
            reading: Reading::unavailable(),
            measures: 0,
            setups: 0,
        }
    }
}

impl SensorsInterface for MockSensors {
    fn setup(&mut self) {
        self.setups += 1;
    }

    fn measure(&mut self) -> Reading {
        self.measures += 1;
        self.reading
    }
}

/// The aggregate mock platform.
pub struct MockPlatform {
    pub time: MockTime,
    pub device: MockDevice,
    pub wifi: MockWifi,
    pub gpio: MockGpio,
    pub flash: MockFlash,
    pub http: MockHttp,
    pub server: MockServer,
    pub dns: MockDns,
    pub sensors: MockSensors,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            time: MockTime::new(),
            device: MockDevice::new(),
            wifi: MockWifi::new(),
            gpio: MockGpio::new(),
            flash: MockFlash::new(),
            http: MockHttp::new(),
            server: MockServer::new(),
            dns: MockDns::new(),
            sensors: MockSensors::new(),
        }
    }
}

impl Platform for MockPlatform {
    type Time = MockTime;
    type Device = MockDevice;
    type Wifi = MockWifi;
    type Gpio = MockGpio;
    type Flash = MockFlash;
    type Http = MockHttp;
    type Server = MockServer;
    type Dns = MockDns;
    type Sensors = MockSensors;

    fn time(&mut self) -> &mut Self::Time {
        &mut self.time
    }

    fn device(&mut self) -> &mut Self::Device {
        &mut self.device
    }

    fn wifi(&mut self) -> &mut Self::Wifi {
        &mut self.wifi
    }

    fn gpio(&mut self) -> &mut Self::Gpio {
        &mut self.gpio
    }

    fn flash(&mut self) -> &mut Self::Flash {
        &mut self.flash
    }

    fn http(&mut self) -> &mut Self::Http {
        &mut self.http
    }

    fn server(&mut self) -> &mut Self::Server {
        &mut self.server
    }

    fn dns(&mut self) -> &mut Self::Dns {
        &mut self.dns
    }

    fn sensors(&mut self) -> &mut Self::Sensors {
        &mut self.sensors
    }
}
