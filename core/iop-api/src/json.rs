//! Fixed-capacity JSON envelopes.
//!
//! Every body sent to the monitor server is serialized into a 768-byte
//! buffer that is zeroed first — envelopes may carry credentials and the
//! buffer lives on the stack, so no previous request's bytes may leak
//! into padding. Overflow is not an error to recover from here: the
//! builder logs the offending context and yields `None`, and the caller
//! decides (fail the operation, or truncate and retry for panics).

use heapless::Vec;
use serde::Serialize;

use iop_common::log::Logger;

/// Fixed JSON document capacity.
pub const JSON_CAPACITY: usize = 768;

/// A serialized envelope, ready to send.
pub type Json = Vec<u8, JSON_CAPACITY>;

/// Serializes `value` into a zeroed fixed buffer. `None` on overflow.
pub fn make_json<T: Serialize>(logger: &Logger, context: &'static str, value: &T) -> Option<Json> {
    let mut buffer = [0u8; JSON_CAPACITY];
    match serde_json_core::to_slice(value, &mut buffer) {
        Ok(written) => {
            let mut json = Json::new();
            // Cannot overflow: written <= JSON_CAPACITY
            json.extend_from_slice(&buffer[..written]).ok()?;
            Some(json)
        }
        Err(_) => {
            logger.error_fmt(format_args!("Payload doesn't fit buffer at {}", context));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_common::log::LogLevel;

    #[derive(Serialize)]
    struct Login<'a> {
        email: &'a str,
        password: &'a str,
    }

    fn logger() -> Logger {
        Logger::new(LogLevel::NoLog, "JSON")
    }

    #[test]
    fn small_values_serialize() {
        let json = make_json(&logger(), "test", &Login { email: "a@b", password: "p" }).unwrap();
        assert_eq!(
            core::str::from_utf8(&json).unwrap(),
            "{\"email\":\"a@b\",\"password\":\"p\"}"
        );
    }

    #[test]
    fn overflow_yields_none() {
        let big = [b'x'; JSON_CAPACITY];
        let value = Login {
            email: core::str::from_utf8(&big).unwrap(),
            password: "p",
        };
        assert!(make_json(&logger(), "test", &value).is_none());
    }

    #[test]
    fn envelope_fits_exactly_at_capacity_boundary() {
        // {"email":"...","password":"p"} carries 27 bytes besides the email
        let payload = [b'x'; JSON_CAPACITY - 27];
        let value = Login {
            email: core::str::from_utf8(&payload).unwrap(),
            password: "p",
        };
        let json = make_json(&logger(), "test", &value).unwrap();
        assert_eq!(json.len(), JSON_CAPACITY);
    }
}
