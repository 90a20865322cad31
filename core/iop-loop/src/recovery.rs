//! # Panic Recovery Pipeline
//!
//! The terminal policy behind the panic hook: report the failure to the
//! monitor server, ask for a replacement image, and sleep on a tier
//! matching how recoverable the situation is. On wake the cycle starts
//! over — a panicking device keeps trying to turn itself into a fixed
//! one for as long as it has credentials.
//!
//! [`PanicRecovery::run`] is the diverging driver the device hook
//! installs; [`PanicRecovery::run_cycle`] is one observable step of it,
//! which is what the tests exercise.

use iop_api::{Api, UpgradeStatus};
use iop_common::log::{LogLevel, Logger};
use iop_common::panic::PanicData;
use iop_hal::traits::{DeviceInterface as _, Platform, WifiInterface as _, WifiMode};
use iop_network::NetworkStatus;
use iop_storage::Storage;

/// Sleep between retries when the server was reachable but something
/// transient failed.
pub const TRANSIENT_SLEEP_SECS: u32 = 10 * 60;

/// Sleep when the network is down entirely.
pub const OFFLINE_SLEEP_SECS: u32 = 60 * 60;

/// What one recovery cycle did; the driver loop ignores it, tests
/// assert on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No stored WiFi credentials: parked indefinitely.
    MissingWifiCredentials,
    /// No auth token: parked indefinitely.
    MissingToken,
    /// Radio disabled: parked indefinitely.
    WifiOff,
    /// Reported and/or attempted upgrade, slept the transient tier.
    SleptTransient,
    /// Link down, slept the offline tier.
    SleptOffline,
    /// The upgrade installed a new image (mock platforms only; real
    /// hardware reboots instead).
    Upgraded,
}

pub struct PanicRecovery {
    logger: Logger,
    reported: bool,
}

impl PanicRecovery {
    pub const fn new(level: LogLevel) -> Self {
        Self {
            logger: Logger::new(level, "PANIC"),
            reported: false,
        }
    }

    /// One pass of the recovery policy.
    pub fn run_cycle<P: Platform>(
        &mut self,
        platform: &mut P,
        storage: &Storage,
        api: &Api,
        panic: &PanicData<'_>,
    ) -> RecoveryAction {
        if storage.wifi(platform.flash()).is_none() {
            self.logger.warn("Nothing we can do, no wifi config available");
            platform.device().deep_sleep(0);
            return RecoveryAction::MissingWifiCredentials;
        }

        let Some(token) = storage.token(platform.flash()) else {
            self.logger.warn("Nothing we can do, no auth token available");
            platform.device().deep_sleep(0);
            return RecoveryAction::MissingToken;
        };

        if platform.wifi().mode() == WifiMode::Off {
            self.logger.crit("WiFi is disabled, unable to recover");
            platform.device().deep_sleep(0);
            return RecoveryAction::WifiOff;
        }

        if platform.wifi().is_connected() {
            if !self.reported {
                let status = api.report_panic(platform, &token, panic);
                self.reported = status == NetworkStatus::Ok;
                if self.reported {
                    self.logger.info("Reported panic to server successfully");
                }
            }

            // Panic data is lost if the report failed but the upgrade
            // works; a fresh image beats a preserved stack trace
            match api.upgrade(platform, &token) {
                UpgradeStatus::Updated => return RecoveryAction::Upgraded,
                UpgradeStatus::Failed(NetworkStatus::Forbidden) => {
                    self.logger.warn("Invalid auth token, but keeping since at panic");
                }
                UpgradeStatus::Failed(_) | UpgradeStatus::NoUpdate => {}
            }

            platform.device().deep_sleep(TRANSIENT_SLEEP_SECS);
            self.wake(platform);
            RecoveryAction::SleptTransient
        } else {
            self.logger.warn("No network, unable to recover");
            platform.device().deep_sleep(OFFLINE_SLEEP_SECS);
            self.wake(platform);
            RecoveryAction::SleptOffline
        }
    }

    // Let the wifi come back before the next cycle
    fn wake<P: Platform>(&self, platform: &mut P) {
        platform.wifi().set_mode(WifiMode::Station);
        platform.wifi().reconnect();
    }

    /// The diverging driver the device panic hook runs.
    pub fn run<P: Platform>(
        &mut self,
        platform: &mut P,
        storage: &Storage,
        api: &Api,
        panic: &PanicData<'_>,
    ) -> ! {
        loop {
            let _ = self.run_cycle(platform, storage, api, panic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_common::code_point;
    use iop_common::data::{AuthToken, NetworkName, NetworkPassword, WifiCredentials};
    use iop_hal::http::OtaOutcome;
    use iop_hal::mock::MockPlatform;
    use iop_hal::traits::StationStatus;

    fn provisioned_platform() -> (MockPlatform, Storage) {
        let mut platform = MockPlatform::new();
        let storage = Storage::new(LogLevel::NoLog);
        storage.setup(&mut platform.flash);
        storage.set_wifi(
            &mut platform.flash,
            &WifiCredentials::new(
                NetworkName::from_slice(b"net").unwrap(),
                NetworkPassword::from_slice(b"psk").unwrap(),
            ),
        );
        storage.set_token(
            &mut platform.flash,
            &AuthToken::from_bytes(&[b'T'; 64]).unwrap(),
        );
        platform.wifi.set_status(StationStatus::GotIp);
        (platform, storage)
    }

    fn api() -> Api {
        Api::new("https://api.internet-of-plants.example", LogLevel::NoLog)
    }

    #[test]
    fn no_wifi_credentials_parks_forever() {
        let mut platform = MockPlatform::new();
        let storage = Storage::new(LogLevel::NoLog);
        storage.setup(&mut platform.flash);

        let point = code_point!();
        let action = PanicRecovery::new(LogLevel::NoLog).run_cycle(
            &mut platform,
            &storage,
            &api(),
            &PanicData::new("boom", &point),
        );
        assert_eq!(action, RecoveryAction::MissingWifiCredentials);
        assert_eq!(platform.device.deep_sleeps.as_slice(), &[0]);
    }

    #[test]
    fn connected_cycle_reports_upgrades_and_sleeps_ten_minutes() {
        let (mut platform, storage) = provisioned_platform();
        platform.http.ota_outcome = OtaOutcome::NoUpdate;

        let point = code_point!();
        let panic = PanicData::new("sensor bus died", &point);
        let mut recovery = PanicRecovery::new(LogLevel::NoLog);
        let action = recovery.run_cycle(&mut platform, &storage, &api(), &panic);

        assert_eq!(action, RecoveryAction::SleptTransient);
        assert_eq!(platform.http.requests.len(), 1);
        assert_eq!(platform.http.requests[0].path(), "/v1/panic");
        assert_eq!(platform.http.ota_calls.len(), 1);
        assert_eq!(
            platform.device.deep_sleeps.as_slice(),
            &[TRANSIENT_SLEEP_SECS]
        );
        assert_eq!(platform.wifi.reconnects, 1);
    }

    #[test]
    fn report_happens_once_across_cycles() {
        let (mut platform, storage) = provisioned_platform();

        let point = code_point!();
        let panic = PanicData::new("boom", &point);
        let mut recovery = PanicRecovery::new(LogLevel::NoLog);
        let _ = recovery.run_cycle(&mut platform, &storage, &api(), &panic);
        let _ = recovery.run_cycle(&mut platform, &storage, &api(), &panic);

        let panic_posts = platform
            .http
            .requests
            .iter()
            .filter(|request| request.path() == "/v1/panic")
            .count();
        assert_eq!(panic_posts, 1);
        // But the upgrade is retried every cycle
        assert_eq!(platform.http.ota_calls.len(), 2);
    }

    #[test]
    fn failed_report_is_retried_next_cycle() {
        let (mut platform, storage) = provisioned_platform();
        platform
            .http
            .push_response(Err(iop_hal::http::codes::READ_TIMEOUT));

        let point = code_point!();
        let panic = PanicData::new("boom", &point);
        let mut recovery = PanicRecovery::new(LogLevel::NoLog);
        let _ = recovery.run_cycle(&mut platform, &storage, &api(), &panic);
        let _ = recovery.run_cycle(&mut platform, &storage, &api(), &panic);

        let panic_posts = platform
            .http
            .requests
            .iter()
            .filter(|request| request.path() == "/v1/panic")
            .count();
        assert_eq!(panic_posts, 2);
    }

    #[test]
    fn offline_cycle_sleeps_an_hour() {
        let (mut platform, storage) = provisioned_platform();
        platform.wifi.set_status(StationStatus::Idle);

        let point = code_point!();
        let action = PanicRecovery::new(LogLevel::NoLog).run_cycle(
            &mut platform,
            &storage,
            &api(),
            &PanicData::new("boom", &point),
        );
        assert_eq!(action, RecoveryAction::SleptOffline);
        assert_eq!(platform.device.deep_sleeps.as_slice(), &[OFFLINE_SLEEP_SECS]);
        assert!(platform.http.requests.is_empty());
    }

    #[test]
    fn wifi_off_parks_forever() {
        let (mut platform, storage) = provisioned_platform();
        platform.wifi.set_mode(WifiMode::Off);

        let point = code_point!();
        let action = PanicRecovery::new(LogLevel::NoLog).run_cycle(
            &mut platform,
            &storage,
            &api(),
            &PanicData::new("boom", &point),
        );
        assert_eq!(action, RecoveryAction::WifiOff);
        assert_eq!(platform.device.deep_sleeps.as_slice(), &[0]);
    }

    #[test]
    fn successful_upgrade_ends_the_cycle() {
        let (mut platform, storage) = provisioned_platform();
        platform.http.ota_outcome = OtaOutcome::Updated;

        let point = code_point!();
        let action = PanicRecovery::new(LogLevel::NoLog).run_cycle(
            &mut platform,
            &storage,
            &api(),
            &PanicData::new("boom", &point),
        );
        assert_eq!(action, RecoveryAction::Upgraded);
        // No sleep: on hardware the device rebooted already
        assert!(platform.device.deep_sleeps.is_empty());
    }

    #[test]
    fn oversized_panic_message_still_yields_one_bounded_post() {
        let (mut platform, storage) = provisioned_platform();
        let huge = [b'x'; 4096];
        let msg = core::str::from_utf8(&huge).unwrap();

        let point = code_point!();
        let panic = PanicData::new(msg, &point);
        let action = PanicRecovery::new(LogLevel::NoLog).run_cycle(
            &mut platform,
            &storage,
            &api(),
            &panic,
        );

        assert_eq!(action, RecoveryAction::SleptTransient);
        let panic_posts: heapless::Vec<_, 8> = platform
            .http
            .requests
            .iter()
            .filter(|request| request.path() == "/v1/panic")
            .collect();
        assert_eq!(panic_posts.len(), 1);
        assert!(panic_posts[0].body.len() <= iop_api::JSON_CAPACITY);
    }
}
