//! # IoP Network Client
//!
//! One-shot HTTP(S) requests against the configured monitor server base
//! URI. Sits between the typed API layer above and the transport traits
//! below, and owns the three cross-cutting request behaviors:
//!
//! - every request carries the full device identity + telemetry header
//!   set, so the server can triage fleet health from headers alone;
//! - every response is checked for the `LATEST_VERSION` header — a value
//!   differing from the running firmware hash fires the process-wide
//!   upgrade hook (at most once per request);
//! - raw transport and HTTP codes collapse into the five-variant
//!   [`NetworkStatus`] the event loop acts on; codes outside the table
//!   bubble up as raw integers.

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

#[cfg(test)]
extern crate std;

pub mod client;
pub mod hook;
pub mod status;
pub mod telemetry;

pub use client::{Network, Response, DEFAULT_TIMEOUT_MS, MAX_PAYLOAD_SIZE};
pub use hook::{set_upgrade_hook, take_upgrade_hook, UpgradeHook};
pub use status::{NetworkStatus, RawStatus};

/// Current version of the iop-network library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
