//! # Platform Abstraction Traits
//!
//! Core trait definitions for hardware access. These enable dependency
//! injection, host testing and platform portability: the same event loop
//! drives an ESP32-C3 in the field and the mock platform under `cargo
//! test`.

use iop_common::{FirmwareHash, MacAddress, WifiCredentials};

use crate::http::{DnsInterface, HttpClientInterface, HttpServerInterface};
use crate::sensors::SensorsInterface;

/// Monotonic time and cooperative scheduling points.
pub trait TimeInterface {
    /// Milliseconds since boot. Monotonic, never wraps in practice
    /// (u64 outlives the hardware).
    fn now_ms(&self) -> u64;

    /// Cooperative blocking delay.
    fn sleep_ms(&mut self, ms: u32);

    /// Voluntary scheduling point; long waits must call this so the
    /// radio stack keeps breathing.
    fn yield_now(&mut self);
}

/// Heap region selector for the telemetry counters. The ESP8266 heritage
/// distinguishes instruction RAM from data RAM; platforms with a single
/// heap report the same numbers for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    Dram,
    Iram,
}

/// Device identity, telemetry counters and power control.
///
/// Identity values are cached by the implementation: the MAC and the
/// firmware MD5 are computed once and handed out for the process
/// lifetime.
pub trait DeviceInterface {
    fn mac_address(&self) -> MacAddress;

    fn firmware_hash(&self) -> FirmwareHash;

    /// Static platform name sent in the `DRIVER` header ("ESP8266",
    /// "ESP32", "mock", ...).
    fn platform(&self) -> &'static str;

    /// Supply voltage in millivolts.
    fn vcc(&self) -> u16;

    fn available_stack(&self) -> u32;

    fn available_heap(&self, region: MemoryRegion) -> u32;

    fn biggest_heap_block(&self, region: MemoryRegion) -> u32;

    /// Blocking NTP synchronization.
    fn sync_ntp(&mut self);

    /// Enters deep sleep for the given number of seconds; `0` means
    /// indefinitely (until external reset). On real hardware this does
    /// not return — the device reboots on wake. Mock implementations
    /// record the call and return so tests can observe the policy.
    fn deep_sleep(&mut self, seconds: u32);
}

/// Station connection state as the radio reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Idle,
    Connecting,
    WrongPassword,
    NoApFound,
    ConnectFail,
    GotIp,
}

impl StationStatus {
    pub fn name(self) -> &'static str {
        match self {
            StationStatus::Idle => "STATION_IDLE",
            StationStatus::Connecting => "STATION_CONNECTING",
            StationStatus::WrongPassword => "STATION_WRONG_PASSWORD",
            StationStatus::NoApFound => "STATION_NO_AP_FOUND",
            StationStatus::ConnectFail => "STATION_CONNECT_FAIL",
            StationStatus::GotIp => "STATION_GOT_IP",
        }
    }
}

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Off,
    Station,
    AccessPoint,
    AccessPointStation,
}

/// The WiFi radio. This is the single source of truth for "is the link
/// up": every consumer asks [`WifiInterface::is_connected`], which is
/// derived from the station status.
pub trait WifiInterface {
    fn status(&self) -> StationStatus;

    fn is_connected(&self) -> bool {
        self.status() == StationStatus::GotIp
    }

    fn mode(&self) -> WifiMode;

    fn set_mode(&mut self, mode: WifiMode);

    /// Starts a station connection and waits for the connect result.
    /// Returns `false` when the attempt timed out before the radio
    /// reported any result; on `true` the caller still has to check
    /// [`WifiInterface::status`] for the outcome.
    fn begin(&mut self, ssid: &[u8], password: &[u8]) -> bool;

    fn disconnect(&mut self);

    /// Re-join the last network; used by the panic recovery wake path.
    fn reconnect(&mut self);

    /// Current station config as opaque blobs, exactly as the radio
    /// stores them.
    fn credentials(&self) -> WifiCredentials;

    /// Registers the connected hook, fired from the radio's event
    /// context when the station gets an IP. ISR rules apply inside.
    fn on_connect(&mut self, hook: fn());

    /// Brings up the soft AP at a static address. Returns `false` when
    /// the radio refused the configuration.
    fn configure_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        ip: [u8; 4],
        netmask: [u8; 4],
    ) -> bool;

    fn local_ip(&self) -> [u8; 4];

    fn access_point_ip(&self) -> [u8; 4];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Minimal GPIO access: the factory reset button and the activity LED.
pub trait GpioInterface {
    fn mode(&mut self, pin: u8, mode: PinMode);

    fn read(&self, pin: u8) -> bool;

    fn write(&mut self, pin: u8, high: bool);

    /// Hooks both edges of the pin. The handler runs in interrupt
    /// context: integer work and `schedule_interrupt` only.
    fn on_change(&mut self, pin: u8, handler: fn());
}

/// Raw persistent byte region. The slot layout and its invariants live
/// in `iop-storage`; this is only the backing device.
pub trait FlashInterface {
    /// Initializes the backing region at boot.
    fn setup(&mut self, size: usize);

    /// Reads one byte; `None` when the offset is out of range.
    fn get(&self, offset: usize) -> Option<u8>;

    /// Bulk read; `false` when the range is out of bounds.
    fn read(&self, offset: usize, buf: &mut [u8]) -> bool;

    /// Writes one byte to the staging copy.
    fn set(&mut self, offset: usize, byte: u8) -> bool;

    /// Bulk write to the staging copy.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> bool;

    /// Persists the staging copy. Durability barrier: readers may only
    /// observe committed state after reboot.
    fn commit(&mut self) -> bool;
}

/// The whole hardware surface behind one generic parameter.
///
/// Accessors hand out mutable references one interface at a time; the
/// control plane gathers what it needs up front (e.g. telemetry before
/// opening an HTTP session) so borrows stay sequential.
pub trait Platform {
    type Time: TimeInterface;
    type Device: DeviceInterface;
    type Wifi: WifiInterface;
    type Gpio: GpioInterface;
    type Flash: FlashInterface;
    type Http: HttpClientInterface;
    type Server: HttpServerInterface;
    type Dns: DnsInterface;
    type Sensors: SensorsInterface;

    fn time(&mut self) -> &mut Self::Time;
    fn device(&mut self) -> &mut Self::Device;
    fn wifi(&mut self) -> &mut Self::Wifi;
    fn gpio(&mut self) -> &mut Self::Gpio;
    fn flash(&mut self) -> &mut Self::Flash;
    fn http(&mut self) -> &mut Self::Http;
    fn server(&mut self) -> &mut Self::Server;
    fn dns(&mut self) -> &mut Self::Dns;
    fn sensors(&mut self) -> &mut Self::Sensors;
}
