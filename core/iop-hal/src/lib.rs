//! # IoP Hardware Abstraction Layer
//!
//! The narrow contract between the device control plane and the hardware
//! it runs on. Everything the event loop, network client, captive portal
//! and persistent store touch — time, device identity, the radio, GPIO,
//! flash, HTTP sessions, the embedded HTTP/DNS servers and the sensor
//! bundle — goes through the traits in this crate.
//!
//! ## Design Principles
//!
//! - **One platform handle**: the [`Platform`] trait aggregates every
//!   interface through associated types, so the core is generic over a
//!   single parameter
//! - **Synchronous, cooperative**: the control plane is specified as one
//!   logical thread with blocking waits; no executor leaks in here
//! - **Mockable**: the `mock` feature ships a scriptable platform with
//!   recorded operations and canned responses for host tests

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

pub mod certs;
pub mod http;
pub mod sensors;
pub mod traits;

#[cfg(feature = "mock")]
pub mod mock;

pub use certs::{CertEntry, CertificateBundle, TrustAnchor, DN_HASH_LEN};
pub use http::{
    HttpClientInterface, HttpMethod, HttpServerInterface, HttpSessionInterface, OtaOutcome,
    ServerRequest, SessionResponse, DnsInterface, MAX_RESPONSE_PAYLOAD,
};
pub use sensors::{Reading, SensorsInterface};
pub use traits::{
    DeviceInterface, FlashInterface, GpioInterface, MemoryRegion, PinMode, Platform,
    StationStatus, TimeInterface, WifiInterface, WifiMode,
};

/// Current version of the iop-hal library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
