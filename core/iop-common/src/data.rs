//! # Shared Credential and Identity Types
//!
//! Fixed-size byte types that cross subsystem boundaries: the monitor
//! server auth token, WiFi credentials as persisted to flash, and the
//! cached device identity strings sent with every HTTP request.
//!
//! All of these are plain arrays with validated constructors. They are
//! `Copy` on purpose: the largest is 96 bytes and the event loop moves
//! them between the store, the portal and the API client every iteration.

use core::fmt;

use crate::utils::is_all_printable;

/// Authentication tokens are exactly this many bytes on the wire
pub const AUTH_TOKEN_LEN: usize = 64;

/// SSID blob length, zero-padded (IEEE 802.11 limit)
pub const NETWORK_NAME_LEN: usize = 32;

/// PSK blob length, zero-padded
pub const NETWORK_PASSWORD_LEN: usize = 64;

/// MD5 hex digest length of the running firmware image
pub const FIRMWARE_HASH_LEN: usize = 32;

/// Textual MAC address length (`XX:XX:XX:XX:XX:XX`)
pub const MAC_ADDRESS_LEN: usize = 17;

/// Opaque token issued by the monitor server on authentication.
///
/// Sent in the `Authorization` header of every authenticated request, so
/// the invariant is load-bearing: all 64 bytes are printable US-ASCII.
/// [`AuthToken::from_bytes`] is the only constructor and enforces it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthToken([u8; AUTH_TOKEN_LEN]);

impl AuthToken {
    /// Validates length and printability; anything else is storage or
    /// server corruption and yields `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != AUTH_TOKEN_LEN || !is_all_printable(bytes) {
            return None;
        }
        let mut raw = [0u8; AUTH_TOKEN_LEN];
        raw.copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; AUTH_TOKEN_LEN] {
        &self.0
    }

    /// The token as a header-ready string view. Infallible because the
    /// constructor only admits printable US-ASCII.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are secrets; show only the edges
        write!(
            f,
            "AuthToken({}{}..{}{})",
            self.0[0] as char, self.0[1] as char,
            self.0[AUTH_TOKEN_LEN - 2] as char, self.0[AUTH_TOKEN_LEN - 1] as char
        )
    }
}

/// WiFi SSID as an opaque, zero-padded 32-byte blob.
///
/// SSIDs are not text: the radio reports whatever bytes the access point
/// broadcast, so no printability is enforced here. Display paths escape
/// through [`crate::utils::scape_non_printable`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NetworkName([u8; NETWORK_NAME_LEN]);

impl NetworkName {
    /// Copies up to 32 bytes, zero-padding the tail. Longer inputs are
    /// rejected rather than silently truncated.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > NETWORK_NAME_LEN {
            return None;
        }
        let mut raw = [0u8; NETWORK_NAME_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; NETWORK_NAME_LEN] {
        &self.0
    }

    /// Bytes up to the first NUL, the way the radio firmware reports it.
    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NETWORK_NAME_LEN);
        &self.0[..end]
    }
}

/// WiFi PSK as an opaque, zero-padded 64-byte blob.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkPassword([u8; NETWORK_PASSWORD_LEN]);

impl NetworkPassword {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > NETWORK_PASSWORD_LEN {
            return None;
        }
        let mut raw = [0u8; NETWORK_PASSWORD_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; NETWORK_PASSWORD_LEN] {
        &self.0
    }

    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NETWORK_PASSWORD_LEN);
        &self.0[..end]
    }
}

impl fmt::Debug for NetworkPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkPassword(..)")
    }
}

/// SSID/PSK pair. Both are present together or not at all; the
/// persistent store writes and clears them as one unit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WifiCredentials {
    pub ssid: NetworkName,
    pub password: NetworkPassword,
}

impl WifiCredentials {
    pub fn new(ssid: NetworkName, password: NetworkPassword) -> Self {
        Self { ssid, password }
    }
}

/// Textual MAC address (`XX:XX:XX:XX:XX:XX`), derived once from the
/// radio and cached for the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacAddress([u8; MAC_ADDRESS_LEN]);

impl MacAddress {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != MAC_ADDRESS_LEN || !is_all_printable(bytes) {
            return None;
        }
        let mut raw = [0u8; MAC_ADDRESS_LEN];
        raw.copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex MD5 of the running firmware image, cached at boot and sent in the
/// `VERSION` header of every request. The server compares it against the
/// latest build to decide whether to advertise an upgrade.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FirmwareHash([u8; FIRMWARE_HASH_LEN]);

impl FirmwareHash {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FIRMWARE_HASH_LEN || !is_all_printable(bytes) {
            return None;
        }
        let mut raw = [0u8; FIRMWARE_HASH_LEN];
        raw.copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; FIRMWARE_HASH_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Display for FirmwareHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
