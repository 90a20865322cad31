//! # HTTP Transport Traits
//!
//! Session-oriented client contract plus the embedded server and DNS
//! driver contracts the captive portal runs on.
//!
//! The client side mirrors the classic embedded HTTP client shape: the
//! caller opens a session against a full URI, decorates it with headers
//! and an authorization value, then sends once. Transport failures come
//! back as the conventional negative error codes (see [`codes`]) so the
//! network layer can classify them alongside HTTP status codes in one
//! table.
//!
//! Reads are the implementor's obligation to keep non-blocking with
//! explicit EOF handling; the response hands the core a fully buffered
//! payload and the *declared* content length so the size cap can be
//! enforced after the head arrives, before anything is interpreted.

use heapless::{String, Vec};

use crate::certs::CertificateBundle;

/// Transport payload buffer size. Larger declared bodies are rejected by
/// the network layer; the transport never buffers more than this.
pub const MAX_RESPONSE_PAYLOAD: usize = 2048;

/// Collected response headers: a handful of short values.
pub const MAX_COLLECTED_HEADERS: usize = 4;

/// Conventional transport error codes, kept numerically compatible with
/// the ESP8266 HTTP client so server-side triage tooling keeps working.
pub mod codes {
    pub const CONNECTION_FAILED: i32 = -1;
    pub const SEND_HEADER_FAILED: i32 = -2;
    pub const SEND_PAYLOAD_FAILED: i32 = -3;
    pub const NOT_CONNECTED: i32 = -4;
    pub const CONNECTION_LOST: i32 = -5;
    pub const NO_STREAM: i32 = -6;
    pub const NO_HTTP_SERVER: i32 = -7;
    pub const TOO_LESS_RAM: i32 = -8;
    pub const ENCODING: i32 = -9;
    pub const STREAM_WRITE: i32 = -10;
    pub const READ_TIMEOUT: i32 = -11;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// What a completed exchange yields: status code, declared body length,
/// the buffered payload and any headers the client was told to collect.
#[derive(Debug, Clone, Default)]
pub struct SessionResponse {
    pub code: u16,
    /// Content length as declared in the response head. May exceed
    /// [`MAX_RESPONSE_PAYLOAD`], in which case `payload` is truncated
    /// and the network layer discards the response.
    pub content_length: usize,
    pub payload: Vec<u8, MAX_RESPONSE_PAYLOAD>,
    headers: Vec<(String<24>, String<48>), MAX_COLLECTED_HEADERS>,
}

impl SessionResponse {
    pub fn new(code: u16, payload: &[u8]) -> Self {
        let mut response = Self {
            code,
            content_length: payload.len(),
            ..Self::default()
        };
        let _ = response.payload.extend_from_slice(payload);
        response
    }

    /// Attaches a collected header. Silently drops past capacity; the
    /// collection list is fixed and tiny.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = String::try_from(name).unwrap_or_default();
        let value = String::try_from(value).unwrap_or_default();
        let _ = self.headers.push((name, value));
        self
    }

    /// Overrides the declared content length (for responses whose body
    /// was cut off at the buffer cap).
    pub fn with_content_length(mut self, length: usize) -> Self {
        self.content_length = length;
        self
    }

    /// Value of a collected header, if the server sent it.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Outcome of the dedicated OTA exchange. Firmware images bypass the
/// regular session path (and its payload cap); on real hardware a
/// successful update reboots the device instead of returning `Updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaOutcome {
    Updated,
    NoUpdate,
    /// Raw transport or HTTP code; classified by the network layer.
    Failed(i32),
}

/// One in-flight HTTP exchange. Dropped without [`send`] it costs
/// nothing; after `send` the session is consumed.
///
/// [`send`]: HttpSessionInterface::send
pub trait HttpSessionInterface {
    /// Sets the `Authorization` value. The implementation applies the
    /// literal `Basic ` prefix — historical, not real HTTP Basic auth.
    fn set_authorization(&mut self, token: &str);

    fn add_header(&mut self, name: &'static str, value: &str);

    /// Performs the exchange. `Err` carries a negative transport code
    /// from [`codes`].
    fn send(&mut self, method: HttpMethod, body: &[u8]) -> Result<SessionResponse, i32>;
}

/// The HTTP(S) client engine. One session in flight at a time.
pub trait HttpClientInterface {
    type Session<'a>: HttpSessionInterface
    where
        Self: 'a;

    /// Response headers to collect on every exchange.
    fn collect_headers(&mut self, names: &'static [&'static str]);

    fn set_timeout_ms(&mut self, timeout: u32);

    /// Installs the trust-anchor bundle into the TLS engine. Without a
    /// bundle the transport speaks plain HTTP.
    fn install_certificates(&mut self, bundle: &'static CertificateBundle);

    /// Opens a session against the full URI. `None` when the socket
    /// could not be opened.
    fn begin(&mut self, uri: &str) -> Option<Self::Session<'_>>;

    /// Streams a firmware image from `uri` and installs it. Does not
    /// return on success on real hardware.
    fn ota_update(&mut self, uri: &str, token: &str, current_version: &str) -> OtaOutcome;
}

/// Longest request path the portal accepts.
pub const SERVER_PATH_CAPACITY: usize = 64;

/// Largest form body the portal accepts (two credential pairs).
pub const SERVER_BODY_CAPACITY: usize = 512;

/// One parsed-enough request from a portal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequest {
    Get {
        path: String<SERVER_PATH_CAPACITY>,
    },
    Post {
        path: String<SERVER_PATH_CAPACITY>,
        body: Vec<u8, SERVER_BODY_CAPACITY>,
    },
}

impl ServerRequest {
    pub fn get(path: &str) -> Self {
        ServerRequest::Get {
            path: String::try_from(path).unwrap_or_default(),
        }
    }

    pub fn post(path: &str, body: &[u8]) -> Self {
        let mut buf = Vec::new();
        let _ = buf.extend_from_slice(body);
        ServerRequest::Post {
            path: String::try_from(path).unwrap_or_default(),
            body: buf,
        }
    }
}

/// The embedded HTTP server the portal binds to port 80. Serving is
/// pull-based: the portal asks for at most one request per round and
/// answers it before asking again.
pub trait HttpServerInterface {
    fn bind(&mut self, port: u16);

    fn close(&mut self);

    fn next_request(&mut self) -> Option<ServerRequest>;

    /// Streams an HTML response assembled from static parts.
    fn respond_html(&mut self, status: u16, parts: &[&str]);

    /// 302 with a `Location` header, ending the current request.
    fn redirect(&mut self, location: &str);
}

/// The DNS hijack server: resolves every query to the given address
/// while started.
pub trait DnsInterface {
    fn start(&mut self, port: u16, ip: [u8; 4]);

    fn stop(&mut self);

    /// Services at most one pending query.
    fn process_next_request(&mut self);
}
