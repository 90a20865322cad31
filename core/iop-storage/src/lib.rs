//! # IoP Persistent Store
//!
//! Durable slots for the two things the device must remember across
//! reboots: the WiFi credential pair and the monitor-server auth token.
//!
//! ## Layout
//!
//! The backing byte region (512 bytes typical, 160 minimum) holds two
//! fixed slots, each guarded by a magic flag byte that distinguishes
//! "written" from "empty":
//!
//! ```text
//! offset 0   [125][ssid: 32][psk: 64]     wifi slot, 97 bytes
//! offset 97  [126][token: 64]             auth slot, 65 bytes
//! ```
//!
//! A slot is observable in exactly two states. The payload is written
//! before its magic byte and both land in one commit, so a reset mid-
//! write leaves the magic clear and the slot reads as empty — magic
//! implies payload valid.
//!
//! Writes are idempotent: setting a value that is already stored issues
//! no flash traffic. Backend failures are invariant violations and go
//! through the panic pipeline.

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

use iop_common::log::{LogLevel, Logger};
use iop_common::utils::scape_non_printable;
use iop_common::{iop_assert, AuthToken, NetworkName, NetworkPassword, WifiCredentials};
use iop_hal::FlashInterface;

/// Current version of the iop-storage library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backing region size requested at setup.
pub const STORAGE_SIZE: usize = 512;

// Magic bytes. Flags to check if information is written to storage.
// Chosen by fair dice roll, guaranteed to be random. Load-bearing: other
// slots must not reuse these values.
const WIFI_WRITTEN_FLAG: u8 = 125;
const AUTH_WRITTEN_FLAG: u8 = 126;

// One byte is reserved for the magic ('is written') flag
const WIFI_SLOT_INDEX: usize = 0;
const WIFI_SLOT_LEN: usize = 1 + 32 + 64;
const AUTH_SLOT_INDEX: usize = WIFI_SLOT_INDEX + WIFI_SLOT_LEN;
const AUTH_SLOT_LEN: usize = 1 + 64;

const _: () = assert!(
    AUTH_SLOT_INDEX + AUTH_SLOT_LEN < STORAGE_SIZE,
    "backing region too small for the credential slots"
);

/// Handle over the flash-backed slots. Owns no data; every operation
/// takes the backing device so the event loop keeps single ownership of
/// the platform.
pub struct Storage {
    logger: Logger,
}

impl Storage {
    pub const fn new(level: LogLevel) -> Self {
        Self {
            logger: Logger::new(level, "STORAGE"),
        }
    }

    /// Initializes the backing region. Must run once at boot before any
    /// slot access.
    pub fn setup<F: FlashInterface>(&self, flash: &mut F) {
        flash.setup(STORAGE_SIZE);
    }

    /// Reads the stored auth token, if any.
    ///
    /// A written slot whose bytes are not 64 printable characters is
    /// corrupt — the token travels in HTTP headers, so non-printable
    /// bytes can only mean a storage or server bug. Corrupt slots are
    /// cleared and read as empty.
    pub fn token<F: FlashInterface>(&self, flash: &mut F) -> Option<AuthToken> {
        let flag = flash.get(AUTH_SLOT_INDEX)?;
        if flag != AUTH_WRITTEN_FLAG {
            return None;
        }

        let mut raw = [0u8; 64];
        iop_assert!(
            flash.read(AUTH_SLOT_INDEX + 1, &mut raw),
            "Failed to read auth token from storage"
        );

        match AuthToken::from_bytes(&raw) {
            Some(token) => {
                self.logger.trace("Found stored auth token");
                Some(token)
            }
            None => {
                self.logger.error_fmt(format_args!(
                    "Auth token was corrupt: {}",
                    scape_non_printable(&raw)
                ));
                self.remove_token(flash);
                None
            }
        }
    }

    /// Stores the token. Returns `true` iff flash actually changed.
    pub fn set_token<F: FlashInterface>(&self, flash: &mut F, token: &AuthToken) -> bool {
        // Avoids re-writing same data
        if flash.get(AUTH_SLOT_INDEX) == Some(AUTH_WRITTEN_FLAG) {
            let mut stored = [0u8; 64];
            iop_assert!(
                flash.read(AUTH_SLOT_INDEX + 1, &mut stored),
                "Failed to read auth token from storage"
            );
            if stored == *token.as_bytes() {
                self.logger.debug("Auth token already stored");
                return false;
            }
        }

        self.logger.info("Writing auth token to storage");
        // Payload first, magic last: a reset in between leaves the slot
        // observably empty
        iop_assert!(
            flash.write(AUTH_SLOT_INDEX + 1, token.as_bytes()),
            "unable to write auth token"
        );
        iop_assert!(
            flash.set(AUTH_SLOT_INDEX, AUTH_WRITTEN_FLAG),
            "unable to set auth token written flag"
        );
        iop_assert!(flash.commit(), "unable to commit auth token");
        true
    }

    /// Clears the token slot. A second call is a no-op with no flash
    /// traffic.
    pub fn remove_token<F: FlashInterface>(&self, flash: &mut F) {
        // Checks if it's written first, avoids wasting writes
        if flash.get(AUTH_SLOT_INDEX) == Some(AUTH_WRITTEN_FLAG) {
            self.logger.info("Deleting stored auth token");
            iop_assert!(
                flash.set(AUTH_SLOT_INDEX, 0),
                "unable to reset auth token written flag"
            );
            iop_assert!(
                flash.write(AUTH_SLOT_INDEX + 1, &[0u8; 64]),
                "unable to delete auth token"
            );
            iop_assert!(flash.commit(), "unable to commit auth token deletion");
        }
    }

    /// Reads the stored WiFi credential pair, if any.
    pub fn wifi<F: FlashInterface>(&self, flash: &mut F) -> Option<WifiCredentials> {
        let flag = flash.get(WIFI_SLOT_INDEX)?;
        if flag != WIFI_WRITTEN_FLAG {
            return None;
        }

        let mut ssid_raw = [0u8; 32];
        let mut psk_raw = [0u8; 64];
        iop_assert!(
            flash.read(WIFI_SLOT_INDEX + 1, &mut ssid_raw),
            "Failed to read SSID from storage"
        );
        iop_assert!(
            flash.read(WIFI_SLOT_INDEX + 1 + 32, &mut psk_raw),
            "Failed to read PSK from storage"
        );

        let ssid = NetworkName::from_slice(&ssid_raw)?;
        let password = NetworkPassword::from_slice(&psk_raw)?;
        self.logger.trace_fmt(format_args!(
            "Found network credentials: {}",
            scape_non_printable(ssid.trimmed())
        ));
        Some(WifiCredentials::new(ssid, password))
    }

    /// Stores the credential pair. Returns `true` iff flash actually
    /// changed; both blobs are compared before any write is issued.
    pub fn set_wifi<F: FlashInterface>(&self, flash: &mut F, credentials: &WifiCredentials) -> bool {
        if flash.get(WIFI_SLOT_INDEX) == Some(WIFI_WRITTEN_FLAG) {
            let mut ssid_raw = [0u8; 32];
            let mut psk_raw = [0u8; 64];
            iop_assert!(
                flash.read(WIFI_SLOT_INDEX + 1, &mut ssid_raw),
                "Failed to read SSID from storage"
            );
            iop_assert!(
                flash.read(WIFI_SLOT_INDEX + 1 + 32, &mut psk_raw),
                "Failed to read PSK from storage"
            );
            if ssid_raw == *credentials.ssid.as_bytes()
                && psk_raw == *credentials.password.as_bytes()
            {
                self.logger.debug("Wifi credentials already stored");
                return false;
            }
        }

        self.logger.info_fmt(format_args!(
            "Writing wifi credentials to storage: {}",
            scape_non_printable(credentials.ssid.trimmed())
        ));
        iop_assert!(
            flash.write(WIFI_SLOT_INDEX + 1, credentials.ssid.as_bytes()),
            "unable to write wifi ssid"
        );
        iop_assert!(
            flash.write(WIFI_SLOT_INDEX + 1 + 32, credentials.password.as_bytes()),
            "unable to write wifi psk"
        );
        iop_assert!(
            flash.set(WIFI_SLOT_INDEX, WIFI_WRITTEN_FLAG),
            "unable to set wifi creds written flag"
        );
        iop_assert!(flash.commit(), "unable to commit wifi creds");
        true
    }

    /// Clears the WiFi slot. A second call is a no-op with no flash
    /// traffic.
    pub fn remove_wifi<F: FlashInterface>(&self, flash: &mut F) {
        if flash.get(WIFI_SLOT_INDEX) == Some(WIFI_WRITTEN_FLAG) {
            self.logger.info("Deleting stored wifi credentials");
            iop_assert!(
                flash.set(WIFI_SLOT_INDEX, 0),
                "unable to reset wifi creds written flag"
            );
            iop_assert!(
                flash.write(WIFI_SLOT_INDEX + 1, &[0u8; 32 + 64]),
                "unable to delete wifi creds"
            );
            iop_assert!(flash.commit(), "unable to commit wifi creds deletion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_hal::mock::MockFlash;

    fn storage() -> Storage {
        Storage::new(LogLevel::NoLog)
    }

    fn flash() -> MockFlash {
        let mut flash = MockFlash::new();
        storage().setup(&mut flash);
        flash
    }

    fn token(fill: u8) -> AuthToken {
        AuthToken::from_bytes(&[fill; 64]).unwrap()
    }

    fn credentials(ssid: &[u8], psk: &[u8]) -> WifiCredentials {
        WifiCredentials::new(
            NetworkName::from_slice(ssid).unwrap(),
            NetworkPassword::from_slice(psk).unwrap(),
        )
    }

    #[test]
    fn empty_store_reads_nothing() {
        let mut flash = flash();
        assert_eq!(storage().token(&mut flash), None);
        assert_eq!(storage().wifi(&mut flash), None);
    }

    #[test]
    fn token_round_trips() {
        let store = storage();
        let mut flash = flash();
        assert!(store.set_token(&mut flash, &token(b'X')));
        assert_eq!(store.token(&mut flash), Some(token(b'X')));
    }

    #[test]
    fn token_slot_layout_is_stable() {
        let store = storage();
        let mut flash = flash();
        store.set_token(&mut flash, &token(b'T'));

        // Magic byte 126 at offset 97, payload right after
        assert_eq!(flash.raw()[97], 126);
        assert_eq!(&flash.raw()[98..98 + 64], &[b'T'; 64]);
        // Wifi slot untouched
        assert_eq!(flash.raw()[0], 0);
    }

    #[test]
    fn set_token_is_idempotent() {
        let store = storage();
        let mut flash = flash();
        assert!(store.set_token(&mut flash, &token(b'X')));

        let writes = flash.writes;
        let commits = flash.commits;
        assert!(!store.set_token(&mut flash, &token(b'X')));
        assert_eq!(flash.writes, writes);
        assert_eq!(flash.commits, commits);

        // A different token does write
        assert!(store.set_token(&mut flash, &token(b'Y')));
        assert!(flash.writes > writes);
    }

    #[test]
    fn remove_token_clears_and_second_remove_is_free() {
        let store = storage();
        let mut flash = flash();
        store.set_token(&mut flash, &token(b'X'));
        store.remove_token(&mut flash);
        assert_eq!(store.token(&mut flash), None);

        let writes = flash.writes;
        store.remove_token(&mut flash);
        assert_eq!(flash.writes, writes);
    }

    #[test]
    fn corrupt_token_is_cleared_on_read() {
        let store = storage();
        let mut flash = flash();
        store.set_token(&mut flash, &token(b'X'));

        // Corrupt one payload byte behind the store's back
        assert!(flash.set(98 + 5, 0x01));

        assert_eq!(store.token(&mut flash), None);
        // Slot is now empty, not merely unreadable
        assert_eq!(flash.raw()[97], 0);
        assert_eq!(store.token(&mut flash), None);
    }

    #[test]
    fn wifi_round_trips_zero_padded() {
        let store = storage();
        let mut flash = flash();
        let creds = credentials(b"plants", b"hunter2");
        assert!(store.set_wifi(&mut flash, &creds));

        let loaded = store.wifi(&mut flash).unwrap();
        assert_eq!(loaded, creds);
        assert_eq!(loaded.ssid.trimmed(), b"plants");

        // Magic byte 125 at offset 0
        assert_eq!(flash.raw()[0], 125);
    }

    #[test]
    fn set_wifi_compares_both_blobs() {
        let store = storage();
        let mut flash = flash();
        let creds = credentials(b"plants", b"hunter2");
        assert!(store.set_wifi(&mut flash, &creds));

        let writes = flash.writes;
        assert!(!store.set_wifi(&mut flash, &creds));
        assert_eq!(flash.writes, writes);

        // Same SSID, different password must write
        assert!(store.set_wifi(&mut flash, &credentials(b"plants", b"other")));
        assert!(flash.writes > writes);
    }

    #[test]
    fn remove_wifi_clears_pair_atomically() {
        let store = storage();
        let mut flash = flash();
        store.set_wifi(&mut flash, &credentials(b"a", b"b"));
        store.remove_wifi(&mut flash);
        assert_eq!(store.wifi(&mut flash), None);
        assert_eq!(flash.raw()[0], 0);
        assert_eq!(&flash.raw()[1..97], &[0u8; 96]);

        let writes = flash.writes;
        store.remove_wifi(&mut flash);
        assert_eq!(flash.writes, writes);
    }

    #[test]
    fn slots_are_independent() {
        let store = storage();
        let mut flash = flash();
        store.set_token(&mut flash, &token(b'X'));
        store.set_wifi(&mut flash, &credentials(b"net", b"psk"));

        store.remove_token(&mut flash);
        assert!(store.wifi(&mut flash).is_some());

        store.set_token(&mut flash, &token(b'X'));
        store.remove_wifi(&mut flash);
        assert!(store.token(&mut flash).is_some());
    }
}
