//! # IoP Common Library
//!
//! Shared foundations for the Internet of Plants firmware core: the
//! level-filtered hookable logger, the global interrupt queue, the panic
//! hook machinery and the fixed-size credential types that every other
//! crate passes around.
//!
//! ## Features
//!
//! - **No heap allocation**: bounded `heapless` buffers everywhere
//! - **ISR discipline**: every process-wide mutable (log hook, panic hook,
//!   interrupt queue) lives behind a `critical-section` scope
//! - **Hookable sinks**: logging and panicking route through replaceable
//!   fn-pointer hooks so the device binary can arm serial, network or
//!   recovery behavior without the core knowing about it

#![no_std]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms, trivial_casts, unused_lifetimes, unused_qualifications)]

#[cfg(test)]
extern crate std;

pub mod data;
pub mod interrupt;
pub mod log;
pub mod panic;
pub mod utils;

// Re-export main types for convenience
pub use data::{
    AuthToken, FirmwareHash, MacAddress, NetworkName, NetworkPassword, WifiCredentials,
    AUTH_TOKEN_LEN, FIRMWARE_HASH_LEN, NETWORK_NAME_LEN, NETWORK_PASSWORD_LEN,
};
pub use interrupt::{deschedule_interrupt, schedule_interrupt, InterruptEvent};
pub use log::{LogHook, LogKind, LogLevel, Logger, Tracer};
pub use panic::{CodePoint, PanicData, PanicHook};

/// Current version of the iop-common library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
