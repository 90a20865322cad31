//! End-to-end scenarios driving the event loop against the mock
//! platform: provisioning, measurement, token lifecycle, upgrade
//! scheduling, factory reset and panic recovery.
//!
//! Everything here shares the process-wide interrupt queue and hooks,
//! so the tests are serialized.

use serial_test::serial;

use iop_common::data::{AuthToken, NetworkName, NetworkPassword, WifiCredentials};
use iop_common::interrupt::{deschedule_interrupt, schedule_interrupt, InterruptEvent};
use iop_common::log::LogLevel;
use iop_common::panic::PanicData;
use iop_hal::http::{OtaOutcome, SessionResponse};
use iop_hal::mock::MockPlatform;
use iop_hal::sensors::Reading;
use iop_hal::traits::StationStatus;
use iop_loop::recovery::{PanicRecovery, RecoveryAction, TRANSIENT_SLEEP_SECS};
use iop_loop::{reset, EventLoop, LoopConfig};
use iop_storage::Storage;

const URI: &str = "https://api.internet-of-plants.example";

fn base_config() -> LoopConfig {
    let mut config = LoopConfig::new(URI);
    config.log_level = LogLevel::NoLog;
    config
}

fn drain_interrupts() {
    while deschedule_interrupt() != InterruptEvent::None {}
}

fn token(fill: u8) -> AuthToken {
    AuthToken::from_bytes(&[fill; 64]).unwrap()
}

fn seed_token(platform: &mut MockPlatform, value: &AuthToken) {
    let storage = Storage::new(LogLevel::NoLog);
    storage.setup(&mut platform.flash);
    storage.set_token(&mut platform.flash, value);
}

fn seed_wifi(platform: &mut MockPlatform) {
    let storage = Storage::new(LogLevel::NoLog);
    storage.setup(&mut platform.flash);
    storage.set_wifi(
        &mut platform.flash,
        &WifiCredentials::new(
            NetworkName::from_slice(b"plants").unwrap(),
            NetworkPassword::from_slice(b"hunter2").unwrap(),
        ),
    );
}

fn event_posts(platform: &MockPlatform) -> usize {
    platform
        .http
        .requests
        .iter()
        .filter(|request| request.path() == "/v1/event")
        .count()
}

#[test]
#[serial]
fn first_boot_with_hardcoded_iop_credentials_authenticates() {
    drain_interrupts();
    let mut config = base_config();
    config.hardcoded_iop = Some(("a@b", "p"));

    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    platform
        .http
        .push_response(Ok(SessionResponse::new(200, &[b'X'; 64])));

    let mut event_loop = EventLoop::new(platform, config);
    event_loop.setup();

    event_loop.iterate();
    event_loop.iterate();

    assert_eq!(event_loop.stored_token(), Some(token(b'X')));

    let platform = event_loop.platform_mut();
    let logins: heapless::Vec<_, 8> = platform
        .http
        .requests
        .iter()
        .filter(|request| request.path() == "/v1/user/login")
        .collect();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].body_str(), "{\"email\":\"a@b\",\"password\":\"p\"}");
    assert!(logins[0].authorization.is_none());
}

#[test]
#[serial]
fn measurement_cadence_posts_readings_with_the_token() {
    drain_interrupts();
    let mut config = base_config();
    config.measurement_interval_ms = 1;

    let reading = Reading {
        air_temp_c: 23.5,
        air_humidity_pct: 40.0,
        air_heat_index_c: 24.1,
        soil_temp_c: 19.2,
        soil_resistivity_raw: 512,
    };

    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    platform.sensors.reading = reading;
    seed_token(&mut platform, &token(b'T'));

    let mut event_loop = EventLoop::new(platform, config);
    event_loop.setup();

    // First iteration handles OnConnection and NTP; after that the
    // measurement task fires whenever its millisecond cadence is due
    event_loop.iterate();
    event_loop.iterate();
    event_loop.iterate();
    assert_eq!(event_posts(event_loop.platform_mut()), 1);

    event_loop.platform_mut().time.advance(1);
    event_loop.iterate();
    assert_eq!(event_posts(event_loop.platform_mut()), 2);

    // Not yet due: no extra post
    event_loop.iterate();
    assert_eq!(event_posts(event_loop.platform_mut()), 2);

    let platform = event_loop.platform_mut();
    let request = platform
        .http
        .requests
        .iter()
        .find(|request| request.path() == "/v1/event")
        .unwrap();
    let auth = request.authorization.as_ref().unwrap();
    assert!(auth.contains(token(b'T').as_str()));
    let (decoded, _): (Reading, usize) = serde_json_core::from_slice(&request.body).unwrap();
    assert_eq!(decoded, reading);
}

#[test]
#[serial]
fn forbidden_event_removes_the_token_and_stops_reporting() {
    drain_interrupts();
    let mut config = base_config();
    config.measurement_interval_ms = 1;

    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    seed_token(&mut platform, &token(b'T'));

    let mut event_loop = EventLoop::new(platform, config);
    event_loop.setup();

    event_loop.iterate(); // OnConnection
    event_loop.iterate(); // NTP

    event_loop
        .platform_mut()
        .http
        .push_response(Ok(SessionResponse::new(403, b"")));
    event_loop.iterate(); // measurement -> 403

    assert_eq!(event_posts(event_loop.platform_mut()), 1);
    assert_eq!(event_loop.stored_token(), None);

    // With the token gone the loop falls back to credential acquisition;
    // no further events are attempted
    for _ in 0..5 {
        event_loop.platform_mut().time.advance(10);
        event_loop.iterate();
    }
    assert_eq!(event_posts(event_loop.platform_mut()), 1);
}

#[test]
#[serial]
fn latest_version_header_schedules_exactly_one_upgrade() {
    drain_interrupts();
    let mut config = base_config();
    config.measurement_interval_ms = 1;

    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    seed_token(&mut platform, &token(b'T'));
    // Running hash is all 'a'; the server advertises all 'B'
    platform.http.push_response(Ok(SessionResponse::new(200, b"")
        .with_header("LATEST_VERSION", core::str::from_utf8(&[b'B'; 32]).unwrap())));
    platform.http.ota_outcome = OtaOutcome::Failed(403);

    let mut event_loop = EventLoop::new(platform, config);
    event_loop.setup();

    event_loop.iterate(); // OnConnection + NTP
    event_loop.iterate(); // measurement -> response carries the header

    // Exactly one MustUpgrade pending
    assert_eq!(deschedule_interrupt(), InterruptEvent::MustUpgrade);
    assert_eq!(deschedule_interrupt(), InterruptEvent::None);
    schedule_interrupt(InterruptEvent::MustUpgrade);

    event_loop.iterate(); // drains MustUpgrade -> Api::upgrade -> Forbidden

    assert_eq!(event_loop.platform_mut().http.ota_calls.len(), 1);
    // Forbidden during upgrade keeps the token
    assert_eq!(event_loop.stored_token(), Some(token(b'T')));
}

#[test]
#[serial]
fn factory_reset_long_press_wipes_credentials() {
    drain_interrupts();
    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    seed_wifi(&mut platform);
    seed_token(&mut platform, &token(b'T'));

    let mut event_loop = EventLoop::new(platform, base_config());
    event_loop.setup();
    drain_interrupts(); // discard the boot-time OnConnection

    // Held for 16 seconds
    reset::on_edge(true, 10_000);
    reset::on_edge(false, 26_000);

    event_loop.iterate();

    assert_eq!(event_loop.stored_token(), None);
    assert_eq!(event_loop.stored_wifi(), None);
    assert!(event_loop.platform_mut().wifi.disconnects >= 1);
}

#[test]
#[serial]
fn panic_with_oversized_message_reports_upgrades_and_sleeps() {
    drain_interrupts();
    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    seed_wifi(&mut platform);
    seed_token(&mut platform, &token(b'T'));

    let storage = Storage::new(LogLevel::NoLog);
    let api = iop_api::Api::new(URI, LogLevel::NoLog);

    let huge = [b'm'; 4096];
    let msg = core::str::from_utf8(&huge).unwrap();
    let point = iop_common::code_point!();
    let panic = PanicData::new(msg, &point);

    let mut recovery = PanicRecovery::new(LogLevel::NoLog);
    let action = recovery.run_cycle(&mut platform, &storage, &api, &panic);

    assert_eq!(action, RecoveryAction::SleptTransient);

    // At most one POST to /v1/panic, body within the envelope capacity
    let panic_posts: heapless::Vec<_, 8> = platform
        .http
        .requests
        .iter()
        .filter(|request| request.path() == "/v1/panic")
        .collect();
    assert_eq!(panic_posts.len(), 1);
    assert!(panic_posts[0].body.len() <= iop_api::JSON_CAPACITY);

    // Then the pipeline attempted an upgrade and deep-slept
    assert_eq!(platform.http.ota_calls.len(), 1);
    assert_eq!(platform.device.deep_sleeps.as_slice(), &[TRANSIENT_SLEEP_SECS]);
}

#[test]
#[serial]
fn connection_loss_opens_the_portal_after_a_minute() {
    drain_interrupts();
    let mut platform = MockPlatform::new();
    seed_wifi(&mut platform);
    // Stored credentials no longer work
    platform.wifi.begin_status = StationStatus::ConnectFail;

    let mut event_loop = EventLoop::new(platform, base_config());
    event_loop.setup();

    // First pass burns the stored-credentials attempt
    event_loop.platform_mut().time.advance(1);
    event_loop.iterate();
    assert_eq!(event_loop.platform_mut().wifi.begin_calls.len(), 1);
    assert_eq!(event_loop.platform_mut().server.bound, None);

    // A minute later the captive portal opens for a new round
    event_loop.platform_mut().time.advance(61_000);
    event_loop.iterate();
    assert_eq!(
        event_loop.platform_mut().server.bound,
        Some(iop_portal::HTTP_PORT)
    );
    assert_eq!(
        event_loop.platform_mut().dns.started,
        Some((iop_portal::DNS_PORT, iop_portal::PORTAL_IP))
    );
}

#[test]
#[serial]
fn ntp_resyncs_on_its_six_hour_cadence() {
    drain_interrupts();
    let mut platform = MockPlatform::new();
    platform.wifi.set_status(StationStatus::GotIp);
    seed_token(&mut platform, &token(b'T'));

    let mut event_loop = EventLoop::new(platform, base_config());
    event_loop.setup();

    event_loop.iterate(); // OnConnection
    event_loop.iterate(); // first sync
    assert_eq!(event_loop.platform_mut().device.ntp_syncs, 1);

    event_loop.platform_mut().time.advance(60_000);
    event_loop.iterate();
    assert_eq!(event_loop.platform_mut().device.ntp_syncs, 1);

    event_loop.platform_mut().time.advance(6 * 60 * 60 * 1000);
    event_loop.iterate();
    assert_eq!(event_loop.platform_mut().device.ntp_syncs, 2);
}

#[test]
#[serial]
fn connection_event_persists_the_working_credentials() {
    drain_interrupts();
    let platform = MockPlatform::new();
    let mut config = base_config();
    config.hardcoded_wifi = Some(("plants", "hunter2"));

    let mut event_loop = EventLoop::new(platform, config);
    event_loop.setup();

    // Not connected, no stored credentials: the hardcoded pair is tried
    // and succeeds, firing the radio's connected hook
    event_loop.iterate();
    assert_eq!(deschedule_interrupt(), InterruptEvent::OnConnection);
    schedule_interrupt(InterruptEvent::OnConnection);

    // The next iteration persists what the radio reports
    event_loop.iterate();
    let stored = event_loop.stored_wifi().unwrap();
    assert_eq!(stored.ssid.trimmed(), b"plants");
    assert_eq!(stored.password.trimmed(), b"hunter2");
}
