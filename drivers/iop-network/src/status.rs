//! # Response Status Taxonomy
//!
//! Two layers of classification. [`RawStatus`] names what the transport
//! or server literally said (HTTP codes plus the conventional negative
//! transport errors); [`NetworkStatus`] is the five-variant summary the
//! event loop schedules against. The lower level is logged, the higher
//! level is acted on.

use iop_hal::http::codes;

/// Higher level error reporting. Lower level is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Ok,
    /// The token is no longer valid; the loop removes it (except during
    /// upgrade, where it is retained to retry).
    Forbidden,
    /// Transient. Retry on a later cadence, no state mutation.
    ConnectionIssues,
    /// Retry later like `ConnectionIssues`, but logged at `Error`.
    BrokenServer,
    /// A contract violation in the firmware itself.
    BrokenClient,
}

impl NetworkStatus {
    pub fn name(self) -> &'static str {
        match self {
            NetworkStatus::Ok => "OK",
            NetworkStatus::Forbidden => "FORBIDDEN",
            NetworkStatus::ConnectionIssues => "CONNECTION_ISSUES",
            NetworkStatus::BrokenServer => "BROKEN_SERVER",
            NetworkStatus::BrokenClient => "BROKEN_CLIENT",
        }
    }
}

/// What the wire actually reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    ConnectionFailed,
    SendFailed,
    ReadFailed,
    EncodingNotSupported,
    NoServer,
    ReadTimeout,
    ConnectionLost,
    Ok,
    NotFound,
    ServerError,
    Forbidden,
    Unknown,
}

impl RawStatus {
    /// Classifies a raw code: positive HTTP status or negative
    /// transport error.
    pub fn from_code(code: i32) -> Self {
        match code {
            200 => RawStatus::Ok,
            403 => RawStatus::Forbidden,
            404 => RawStatus::NotFound,
            500 => RawStatus::ServerError,
            codes::CONNECTION_FAILED => RawStatus::ConnectionFailed,
            codes::SEND_HEADER_FAILED | codes::SEND_PAYLOAD_FAILED => RawStatus::SendFailed,
            codes::NOT_CONNECTED | codes::CONNECTION_LOST => RawStatus::ConnectionLost,
            // Unsupported Transfer-Encoding header; if set it must be "chunked"
            codes::ENCODING => RawStatus::EncodingNotSupported,
            codes::NO_STREAM | codes::STREAM_WRITE => RawStatus::ReadFailed,
            codes::NO_HTTP_SERVER => RawStatus::NoServer,
            codes::READ_TIMEOUT => RawStatus::ReadTimeout,
            _ => RawStatus::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RawStatus::ConnectionFailed => "CONNECTION_FAILED",
            RawStatus::SendFailed => "SEND_FAILED",
            RawStatus::ReadFailed => "READ_FAILED",
            RawStatus::EncodingNotSupported => "ENCODING_NOT_SUPPORTED",
            RawStatus::NoServer => "NO_SERVER",
            RawStatus::ReadTimeout => "READ_TIMEOUT",
            RawStatus::ConnectionLost => "CONNECTION_LOST",
            RawStatus::Ok => "OK",
            RawStatus::NotFound => "NOT_FOUND",
            RawStatus::ServerError => "SERVER_ERROR",
            RawStatus::Forbidden => "FORBIDDEN",
            RawStatus::Unknown => "UNKNOWN",
        }
    }

    /// The event-loop-facing summary, or `None` for codes the loop has
    /// no policy for (those bubble up raw).
    pub fn api_status(self) -> Option<NetworkStatus> {
        match self {
            RawStatus::ConnectionFailed
            | RawStatus::ConnectionLost
            | RawStatus::SendFailed
            | RawStatus::ReadFailed
            | RawStatus::ReadTimeout => Some(NetworkStatus::ConnectionIssues),

            RawStatus::EncodingNotSupported | RawStatus::NoServer | RawStatus::ServerError => {
                Some(NetworkStatus::BrokenServer)
            }

            RawStatus::Ok => Some(NetworkStatus::Ok),
            RawStatus::Forbidden => Some(NetworkStatus::Forbidden),

            RawStatus::NotFound | RawStatus::Unknown => None,
        }
    }
}
