//! `application/x-www-form-urlencoded` decoding for the provisioning
//! form. Lenient on purpose: unknown fields are skipped, malformed
//! percent escapes pass through literally, values past capacity are
//! truncated. A credential pair only counts when both halves are
//! non-empty.

use heapless::String;

/// What one `POST /submit` carried.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    /// (`ssid`, `password`) when both arrived non-empty.
    pub wifi: Option<(String<32>, String<64>)>,
    /// (`iopEmail`, `iopPassword`) when both arrived non-empty.
    pub iop: Option<(String<64>, String<64>)>,
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes one urlencoded value into a bounded string. `+` becomes a
/// space; `%XX` becomes the byte; anything that is not valid UTF-8
/// after decoding yields an empty value (credentials entered through
/// the form are text).
fn decode_value<const N: usize>(raw: &[u8]) -> String<N> {
    let mut bytes = heapless::Vec::<u8, 128>::new();
    let mut idx = 0;
    while idx < raw.len() {
        let byte = raw[idx];
        let decoded = match byte {
            b'+' => {
                idx += 1;
                b' '
            }
            b'%' => {
                let pair = raw.get(idx + 1).copied().zip(raw.get(idx + 2).copied());
                match pair.and_then(|(hi, lo)| hex_value(hi).zip(hex_value(lo))) {
                    Some((hi, lo)) => {
                        idx += 3;
                        (hi << 4) | lo
                    }
                    None => {
                        idx += 1;
                        b'%'
                    }
                }
            }
            other => {
                idx += 1;
                other
            }
        };
        if bytes.push(decoded).is_err() {
            break;
        }
    }

    match core::str::from_utf8(&bytes) {
        Ok(text) => {
            let mut out = String::new();
            for ch in text.chars() {
                if out.push(ch).is_err() {
                    break;
                }
            }
            out
        }
        Err(_) => String::new(),
    }
}

/// Parses the form body into the credential pairs the portal acts on.
pub fn parse_form(body: &[u8]) -> FormSubmission {
    let mut ssid: String<32> = String::new();
    let mut password: String<64> = String::new();
    let mut iop_email: String<64> = String::new();
    let mut iop_password: String<64> = String::new();

    for pair in body.split(|&byte| byte == b'&') {
        let mut halves = pair.splitn(2, |&byte| byte == b'=');
        let key = halves.next().unwrap_or(&[]);
        let value = halves.next().unwrap_or(&[]);

        match key {
            b"ssid" => ssid = decode_value(value),
            b"password" => password = decode_value(value),
            b"iopEmail" => iop_email = decode_value(value),
            b"iopPassword" => iop_password = decode_value(value),
            _ => {}
        }
    }

    FormSubmission {
        wifi: (!ssid.is_empty() && !password.is_empty()).then(|| (ssid, password)),
        iop: (!iop_email.is_empty() && !iop_password.is_empty())
            .then(|| (iop_email, iop_password)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_credential_pairs() {
        let form = parse_form(b"ssid=plants&password=hunter2&iopEmail=a%40b.com&iopPassword=p+q");
        let (ssid, password) = form.wifi.unwrap();
        assert_eq!(ssid.as_str(), "plants");
        assert_eq!(password.as_str(), "hunter2");
        let (email, iop_password) = form.iop.unwrap();
        assert_eq!(email.as_str(), "a@b.com");
        assert_eq!(iop_password.as_str(), "p q");
    }

    #[test]
    fn any_field_may_be_absent() {
        let form = parse_form(b"ssid=plants&password=psk");
        assert!(form.wifi.is_some());
        assert!(form.iop.is_none());

        let form = parse_form(b"iopEmail=a%40b&iopPassword=p");
        assert!(form.wifi.is_none());
        assert!(form.iop.is_some());

        assert_eq!(parse_form(b""), FormSubmission::default());
    }

    #[test]
    fn half_a_pair_does_not_count() {
        assert!(parse_form(b"ssid=plants").wifi.is_none());
        assert!(parse_form(b"ssid=plants&password=").wifi.is_none());
        assert!(parse_form(b"iopEmail=a%40b&iopPassword=").iop.is_none());
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let form = parse_form(b"wifi=true&ssid=net&password=psk&submit=Submit");
        assert!(form.wifi.is_some());
    }

    #[test]
    fn malformed_percent_escapes_pass_through() {
        let form = parse_form(b"ssid=a%GZb&password=x");
        let (ssid, _) = form.wifi.unwrap();
        assert_eq!(ssid.as_str(), "a%GZb");
    }

    #[test]
    fn overlong_values_truncate_at_capacity() {
        let mut body = heapless::Vec::<u8, 256>::new();
        body.extend_from_slice(b"ssid=").unwrap();
        body.extend_from_slice(&[b'x'; 80]).unwrap();
        body.extend_from_slice(b"&password=p").unwrap();
        let form = parse_form(&body);
        let (ssid, _) = form.wifi.unwrap();
        assert_eq!(ssid.len(), 32);
    }
}
