//! ESP32-C3 implementation of the platform traits.
//!
//! Thin adapters from the control plane's hardware contract onto
//! `esp-hal`, `esp-wifi` and the synchronous network stack. This build
//! carries no TLS engine, so the client speaks plain HTTP and the
//! certificate bundle install is reported and skipped.

use core::cell::RefCell;
use core::fmt::Write as _;

use critical_section::Mutex;
use embedded_storage::{ReadStorage, Storage as _};
use esp_hal::delay::Delay;
use esp_hal::gpio::{Event, Input, InputConfig, Output, OutputConfig, Pull};
use esp_hal::peripherals::Peripherals;
use esp_storage::FlashStorage;
use heapless::String;

use iop_common::data::{FirmwareHash, MacAddress, NetworkName, NetworkPassword, WifiCredentials};
use iop_common::log::{LogLevel, Logger};
use iop_hal::certs::CertificateBundle;
use iop_hal::http::{
    DnsInterface, HttpClientInterface, HttpMethod, HttpServerInterface, HttpSessionInterface,
    OtaOutcome, ServerRequest, SessionResponse,
};
use iop_hal::sensors::{Reading, SensorsInterface};
use iop_hal::traits::{
    DeviceInterface, FlashInterface, GpioInterface, MemoryRegion, PinMode, Platform,
    StationStatus, TimeInterface, WifiInterface, WifiMode,
};

use crate::net;

const LOGGER: Logger = Logger::new(LogLevel::Info, "DRIVER");

/// Credential storage region: the NVS partition of the standard layout.
const STORAGE_FLASH_OFFSET: u32 = 0x9000;

/// Passive OTA app partition of the standard two-app layout.
const OTA_PARTITION_OFFSET: u32 = 0x110000;
const OTADATA_OFFSET: u32 = 0xD000;

static RESET_PIN: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));
static RESET_ISR: Mutex<core::cell::Cell<Option<fn()>>> =
    Mutex::new(core::cell::Cell::new(None));

/// Pin level + monotonic clock for the factory reset trampoline.
pub fn reset_pin_snapshot(_pin: u8) -> (bool, u64) {
    let level = critical_section::with(|cs| {
        RESET_PIN
            .borrow_ref(cs)
            .as_ref()
            .map(|input| input.is_high())
            .unwrap_or(false)
    });
    (level, now_ms())
}

fn now_ms() -> u64 {
    esp_hal::time::Instant::now()
        .duration_since_epoch()
        .as_millis()
}

/// Keeps the radio and TCP timers serviced between loop iterations.
pub fn yield_to_radio() {
    net::poll();
}

pub fn write_ota_chunk(offset: usize, chunk: &[u8]) -> Result<(), i32> {
    let mut flash = FlashStorage::new();
    flash
        .write(OTA_PARTITION_OFFSET + offset as u32, chunk)
        .map_err(|_| iop_hal::http::codes::STREAM_WRITE)
}

/// Marks the passive partition bootable.
pub fn commit_ota(image_len: usize) -> Result<(), i32> {
    LOGGER.info_fmt(format_args!("Image received: {} bytes", image_len));
    let mut flash = FlashStorage::new();
    // otadata sequence bump selects the other slot on next boot
    let mut entry = [0u8; 32];
    let _ = flash.read(OTADATA_OFFSET, &mut entry);
    let sequence = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]).wrapping_add(1);
    entry[..4].copy_from_slice(&sequence.to_le_bytes());
    flash
        .write(OTADATA_OFFSET, &entry)
        .map_err(|_| iop_hal::http::codes::STREAM_WRITE)
}

pub fn reboot() -> ! {
    esp_hal::system::software_reset()
}

pub struct EspTime {
    delay: Delay,
}

impl TimeInterface for EspTime {
    fn now_ms(&self) -> u64 {
        now_ms()
    }

    fn sleep_ms(&mut self, ms: u32) {
        // Long waits keep the radio alive
        let mut remaining = ms;
        while remaining > 0 {
            let step = remaining.min(50);
            self.delay.delay_millis(step);
            net::poll();
            remaining -= step;
        }
    }

    fn yield_now(&mut self) {
        net::poll();
    }
}

pub struct EspDevice {
    mac: MacAddress,
    firmware_hash: FirmwareHash,
    rtc: esp_hal::rtc_cntl::Rtc<'static>,
}

impl EspDevice {
    fn new(mac_raw: [u8; 6], rtc: esp_hal::rtc_cntl::Rtc<'static>) -> Self {
        let mut text: String<17> = String::new();
        let _ = write!(
            text,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            mac_raw[0], mac_raw[1], mac_raw[2], mac_raw[3], mac_raw[4], mac_raw[5]
        );
        let mac = MacAddress::from_bytes(text.as_bytes())
            .unwrap_or_else(|| iop_common::iop_panic!("MAC address of wrong length"));

        // Stamped by the release script; the server compares it against
        // its latest build to drive upgrades
        let firmware_hash = FirmwareHash::from_bytes(env!("IOP_VERSION_MD5").as_bytes())
            .unwrap_or_else(|| iop_common::iop_panic!("MD5 of wrong length"));

        Self { mac, firmware_hash, rtc }
    }
}

impl DeviceInterface for EspDevice {
    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn firmware_hash(&self) -> FirmwareHash {
        self.firmware_hash
    }

    fn platform(&self) -> &'static str {
        "ESP32C3"
    }

    fn vcc(&self) -> u16 {
        // The C3 has no VDD33 measurement channel; report nominal
        3300
    }

    fn available_stack(&self) -> u32 {
        // No stack watermark instrumentation on this target; the
        // telemetry dashboard treats the configured size as the ceiling
        8 * 1024
    }

    fn available_heap(&self, _region: MemoryRegion) -> u32 {
        // Single unified heap on the C3; both region views report it
        esp_alloc::HEAP.free() as u32
    }

    fn biggest_heap_block(&self, _region: MemoryRegion) -> u32 {
        esp_alloc::HEAP.free() as u32
    }

    fn sync_ntp(&mut self) {
        net::sntp_sync();
    }

    fn deep_sleep(&mut self, seconds: u32) {
        use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
        if seconds == 0 {
            // No wakeup source: sleep until external reset
            self.rtc.sleep_deep(&[]);
        }
        let timer = TimerWakeupSource::new(core::time::Duration::from_secs(u64::from(seconds)));
        self.rtc.sleep_deep(&[&timer]);
    }
}

pub struct EspWifi {
    controller: esp_wifi::wifi::WifiController<'static>,
    mode: WifiMode,
    connect_hook: Option<fn()>,
    credentials: WifiCredentials,
}

fn empty_credentials() -> WifiCredentials {
    WifiCredentials::new(
        NetworkName::from_slice(&[]).unwrap_or_else(|| unreachable!()),
        NetworkPassword::from_slice(&[]).unwrap_or_else(|| unreachable!()),
    )
}

impl WifiInterface for EspWifi {
    fn status(&self) -> StationStatus {
        use esp_wifi::wifi::WifiState;
        match esp_wifi::wifi::wifi_state() {
            WifiState::StaConnected => StationStatus::GotIp,
            WifiState::StaStarted => StationStatus::Connecting,
            WifiState::StaDisconnected => StationStatus::ConnectFail,
            WifiState::StaStopped | WifiState::Invalid => StationStatus::Idle,
            _ => StationStatus::Idle,
        }
    }

    fn mode(&self) -> WifiMode {
        self.mode
    }

    fn set_mode(&mut self, mode: WifiMode) {
        self.mode = mode;
    }

    fn begin(&mut self, ssid: &[u8], password: &[u8]) -> bool {
        use esp_wifi::wifi::{ClientConfiguration, Configuration};

        let ssid_text = core::str::from_utf8(ssid).unwrap_or("");
        let password_text = core::str::from_utf8(password).unwrap_or("");
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid_text.into(),
            password: password_text.into(),
            ..Default::default()
        });
        if self.controller.set_configuration(&config).is_err() {
            return false;
        }
        let _ = self.controller.start();
        if self.controller.connect().is_err() {
            return false;
        }

        // Wait for the connect result, radio serviced throughout
        let deadline = esp_hal::time::Instant::now() + esp_hal::time::Duration::from_secs(15);
        loop {
            match self.status() {
                StationStatus::GotIp => {
                    self.credentials = WifiCredentials::new(
                        NetworkName::from_slice(ssid).unwrap_or_else(empty_name),
                        NetworkPassword::from_slice(password).unwrap_or_else(empty_password),
                    );
                    if let Some(hook) = self.connect_hook {
                        hook();
                    }
                    return true;
                }
                StationStatus::ConnectFail | StationStatus::WrongPassword => return true,
                _ => {}
            }
            if esp_hal::time::Instant::now() > deadline {
                return false;
            }
            net::poll();
        }
    }

    fn disconnect(&mut self) {
        let _ = self.controller.disconnect();
    }

    fn reconnect(&mut self) {
        let _ = self.controller.connect();
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
        use esp_wifi::wifi::{AccessPointConfiguration, Configuration};

        let current = self.controller.configuration().unwrap_or_default();
        let client = match current {
            Configuration::Client(client) | Configuration::Mixed(client, _) => client,
            _ => Default::default(),
        };
        let ap = AccessPointConfiguration {
            ssid: ssid.into(),
            password: password.into(),
            ..Default::default()
        };
        let ok = self
            .controller
            .set_configuration(&Configuration::Mixed(client, ap))
            .is_ok();
        net::configure_ap_address(ip, netmask);
        ok && self.controller.start().is_ok()
    }

    fn local_ip(&self) -> [u8; 4] {
        net::station_ip()
    }

    fn access_point_ip(&self) -> [u8; 4] {
        iop_portal::PORTAL_IP
    }
}

fn empty_name() -> NetworkName {
    NetworkName::from_slice(&[]).unwrap_or_else(|| unreachable!())
}

fn empty_password() -> NetworkPassword {
    NetworkPassword::from_slice(&[]).unwrap_or_else(|| unreachable!())
}

/// The two pins the control plane drives: the activity LED and the
/// factory reset button.
pub struct EspGpio {
    led: Output<'static>,
}

impl GpioInterface for EspGpio {
    fn mode(&mut self, _pin: u8, _mode: PinMode) {
        // Pins are claimed and configured at init; modes are fixed
    }

    fn read(&self, pin: u8) -> bool {
        reset_pin_snapshot(pin).0
    }

    fn write(&mut self, _pin: u8, high: bool) {
        if high {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
    }

    fn on_change(&mut self, _pin: u8, handler: fn()) {
        critical_section::with(|cs| {
            RESET_ISR.borrow(cs).set(Some(handler));
            if let Some(input) = RESET_PIN.borrow_ref_mut(cs).as_mut() {
                input.listen(Event::AnyEdge);
            }
        });
    }
}

#[esp_hal::handler]
fn gpio_interrupt_handler() {
    critical_section::with(|cs| {
        if let Some(input) = RESET_PIN.borrow_ref_mut(cs).as_mut() {
            if input.is_interrupt_set() {
                input.clear_interrupt();
                if let Some(isr) = RESET_ISR.borrow(cs).get() {
                    isr();
                }
            }
        }
    });
}

/// Staged 512-byte credential region over the NVS flash area.
pub struct EspFlash {
    staging: [u8; iop_storage::STORAGE_SIZE],
    size: usize,
}

impl FlashInterface for EspFlash {
    fn setup(&mut self, size: usize) {
        self.size = size.min(self.staging.len());
        let mut flash = FlashStorage::new();
        let _ = flash.read(STORAGE_FLASH_OFFSET, &mut self.staging[..self.size]);
    }

    fn get(&self, offset: usize) -> Option<u8> {
        (offset < self.size).then(|| self.staging[offset])
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(buf.len()) else {
            return false;
        };
        if end > self.size {
            return false;
        }
        buf.copy_from_slice(&self.staging[offset..end]);
        true
    }

    fn set(&mut self, offset: usize, byte: u8) -> bool {
        if offset >= self.size {
            return false;
        }
        self.staging[offset] = byte;
        true
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        if end > self.size {
            return false;
        }
        self.staging[offset..end].copy_from_slice(bytes);
        true
    }

    fn commit(&mut self) -> bool {
        let mut flash = FlashStorage::new();
        flash
            .write(STORAGE_FLASH_OFFSET, &self.staging[..self.size])
            .is_ok()
    }
}

pub struct EspHttp {
    collected: &'static [&'static str],
    timeout_ms: u32,
}

pub struct EspSession<'a> {
    client: &'a mut EspHttp,
    exchange: net::HttpExchange,
}

impl HttpSessionInterface for EspSession<'_> {
    fn set_authorization(&mut self, token: &str) {
        let mut value: String<96> = String::new();
        let _ = value.push_str("Basic ");
        let _ = value.push_str(token);
        self.exchange.authorization = Some(value);
    }

    fn add_header(&mut self, name: &'static str, value: &str) {
        let _ = self
            .exchange
            .headers
            .push((name, String::try_from(value).unwrap_or_default()));
    }

    fn send(&mut self, method: HttpMethod, body: &[u8]) -> Result<SessionResponse, i32> {
        self.exchange.method = method;
        self.exchange.timeout_ms = self.client.timeout_ms;
        self.exchange.send(body, self.client.collected)
    }
}

impl HttpClientInterface for EspHttp {
    type Session<'a>
        = EspSession<'a>
    where
        Self: 'a;

    fn collect_headers(&mut self, names: &'static [&'static str]) {
        self.collected = names;
    }

    fn set_timeout_ms(&mut self, timeout: u32) {
        self.timeout_ms = timeout;
    }

    fn install_certificates(&mut self, _bundle: &'static CertificateBundle) {
        // No TLS engine in this build; the design tolerates plain HTTP
        LOGGER.warn("TLS disabled in this build, certificate bundle ignored");
    }

    fn begin(&mut self, uri: &str) -> Option<Self::Session<'_>> {
        Some(EspSession {
            exchange: net::HttpExchange {
                method: HttpMethod::Get,
                uri: String::try_from(uri).ok()?,
                authorization: None,
                headers: heapless::Vec::new(),
                timeout_ms: self.timeout_ms,
            },
            client: self,
        })
    }

    fn ota_update(&mut self, uri: &str, token: &str, current_version: &str) -> OtaOutcome {
        match net::ota_update(uri, token, current_version) {
            Ok(true) => OtaOutcome::Updated,
            Ok(false) => OtaOutcome::NoUpdate,
            Err(code) => OtaOutcome::Failed(code),
        }
    }
}

pub struct EspServer {
    inner: net::PortalHttp,
}

impl HttpServerInterface for EspServer {
    fn bind(&mut self, port: u16) {
        self.inner.bind(port);
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn next_request(&mut self) -> Option<ServerRequest> {
        self.inner.next_request()
    }

    fn respond_html(&mut self, status: u16, parts: &[&str]) {
        self.inner.respond(status, "text/html", parts);
    }

    fn redirect(&mut self, location: &str) {
        self.inner.redirect(location);
    }
}

pub struct EspDns {
    inner: net::HijackDns,
}

impl DnsInterface for EspDns {
    fn start(&mut self, port: u16, ip: [u8; 4]) {
        self.inner.start(port, ip);
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn process_next_request(&mut self) {
        self.inner.process();
    }
}

/// The probe bundle. The air probe driver attaches through the DHT
/// crate when wired; absent probes report NaN and the server treats
/// them as disconnected.
pub struct EspSensors;

impl SensorsInterface for EspSensors {
    fn setup(&mut self) {}

    fn measure(&mut self) -> Reading {
        Reading::unavailable()
    }
}

pub struct Esp32Platform {
    time: EspTime,
    device: EspDevice,
    wifi: EspWifi,
    gpio: EspGpio,
    flash: EspFlash,
    http: EspHttp,
    server: EspServer,
    dns: EspDns,
    sensors: EspSensors,
}

/// Static allocation helper for driver state that must outlive main.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        CELL.init($val)
    }};
}

impl Esp32Platform {
    pub fn initialize(peripherals: Peripherals) -> Self {
        let timg0 = esp_hal::timer::timg::TimerGroup::new(peripherals.TIMG0);
        let wifi_init = mk_static!(
            esp_wifi::EspWifiController<'static>,
            esp_wifi::init(timg0.timer0, esp_hal::rng::Rng::new(peripherals.RNG))
                .unwrap_or_else(|_| iop_common::iop_panic!("Unable to initialize the WiFi stack"))
        );

        let (controller, interfaces) = esp_wifi::wifi::new(wifi_init, peripherals.WIFI)
            .unwrap_or_else(|_| iop_common::iop_panic!("Unable to claim the radio"));
        let mac = interfaces.sta.mac_address();
        net::boot_stack(interfaces.sta);

        let mut io = esp_hal::gpio::Io::new(peripherals.IO_MUX);
        io.set_interrupt_handler(gpio_interrupt_handler);
        let led = Output::new(peripherals.GPIO2, esp_hal::gpio::Level::Low, OutputConfig::default());
        let reset_button = Input::new(
            peripherals.GPIO5,
            InputConfig::default().with_pull(Pull::Down),
        );
        critical_section::with(|cs| {
            *RESET_PIN.borrow_ref_mut(cs) = Some(reset_button);
        });

        let rtc = esp_hal::rtc_cntl::Rtc::new(peripherals.LPWR);

        Self {
            time: EspTime { delay: Delay::new() },
            device: EspDevice::new(mac, rtc),
            wifi: EspWifi {
                controller,
                mode: WifiMode::Station,
                connect_hook: None,
                credentials: empty_credentials(),
            },
            gpio: EspGpio { led },
            flash: EspFlash {
                staging: [0; iop_storage::STORAGE_SIZE],
                size: 0,
            },
            http: EspHttp {
                collected: &[],
                timeout_ms: 60_000,
            },
            server: EspServer {
                inner: net::PortalHttp::new(),
            },
            dns: EspDns {
                inner: net::HijackDns::new(),
            },
            sensors: EspSensors,
        }
    }
}

impl Platform for Esp32Platform {
    type Time = EspTime;
    type Device = EspDevice;
    type Wifi = EspWifi;
    type Gpio = EspGpio;
    type Flash = EspFlash;
    type Http = EspHttp;
    type Server = EspServer;
    type Dns = EspDns;
    type Sensors = EspSensors;

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
