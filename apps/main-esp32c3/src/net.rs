//! Synchronous network plumbing over `blocking-network-stack`.
//!
//! The transport contract the control plane needs is narrow: open a TCP
//! session, write an HTTP/1.0 request, read the head and a bounded
//! body; answer portal HTTP requests on port 80; answer every DNS query
//! on port 53 with the portal address. All of it is hand-rolled over
//! raw sockets here — this build has no TLS engine, so the client
//! speaks plain HTTP and the certificate bundle install is a no-op.

use core::cell::RefCell;
use core::fmt::Write as _;

use blocking_network_stack::Stack;
use critical_section::Mutex;
use esp_wifi::wifi::WifiDevice;
use heapless::{String, Vec};
use smoltcp::wire::{IpAddress, Ipv4Address};

use iop_common::log::{LogLevel, Logger};
use iop_hal::http::{
    codes, HttpMethod, ServerRequest, SessionResponse, MAX_RESPONSE_PAYLOAD,
    SERVER_BODY_CAPACITY,
};

pub type NetStack = Stack<'static, WifiDevice<'static>>;

static STACK: Mutex<RefCell<Option<&'static mut NetStack>>> = Mutex::new(RefCell::new(None));

const LOGGER: Logger = Logger::new(LogLevel::Warn, "HTTP CLIENT");

/// Hands the booted stack to the socket helpers.
pub fn install_stack(stack: &'static mut NetStack) {
    critical_section::with(|cs| *STACK.borrow_ref_mut(cs) = Some(stack));
}

/// Brings up the interface, socket storage and DHCP client around the
/// station device and installs the stack.
pub fn boot_stack(device: WifiDevice<'static>) {
    use smoltcp::iface::{Config as IfaceConfig, Interface, SocketSet, SocketStorage};
    use smoltcp::wire::{EthernetAddress, HardwareAddress};

    static mut DEVICE: Option<WifiDevice<'static>> = None;
    let device = unsafe {
        DEVICE = Some(device);
        #[allow(static_mut_refs)]
        DEVICE.as_mut().unwrap_or_else(|| unreachable!())
    };

    let mac = device.mac_address();
    let config = IfaceConfig::new(HardwareAddress::Ethernet(EthernetAddress::from_bytes(&mac)));
    let iface = Interface::new(
        config,
        device,
        smoltcp::time::Instant::from_millis(
            esp_hal::time::Instant::now().duration_since_epoch().as_millis() as i64,
        ),
    );

    let storage = static_cell::ConstStaticCell::<[SocketStorage<'static>; 4]>::new(
        [SocketStorage::EMPTY; 4],
    )
    .take();
    let mut sockets = SocketSet::new(&mut storage[..]);
    sockets.add(smoltcp::socket::dhcpv4::Socket::new());

    let stack = {
        static CELL: static_cell::StaticCell<NetStack> = static_cell::StaticCell::new();
        CELL.init(Stack::new(iface, device, sockets, timestamp, 0x6f70_6c61))
    };
    install_stack(stack);
}

fn timestamp() -> smoltcp::time::Instant {
    smoltcp::time::Instant::from_millis(
        esp_hal::time::Instant::now().duration_since_epoch().as_millis() as i64,
    )
}

/// Station address, zeroed while DHCP has not resolved.
pub fn station_ip() -> [u8; 4] {
    with_stack(|stack| {
        stack
            .get_ip_info()
            .map(|info| info.ip.octets())
            .unwrap_or([0, 0, 0, 0])
    })
    .unwrap_or([0, 0, 0, 0])
}

/// Pins the interface to the portal's static address while the AP is
/// up.
pub fn configure_ap_address(ip: [u8; 4], _netmask: [u8; 4]) {
    with_stack(|stack| {
        let _ = stack.set_iface_configuration(&blocking_network_stack::ipv4::Configuration::Client(
            blocking_network_stack::ipv4::ClientConfiguration::Fixed(
                blocking_network_stack::ipv4::ClientSettings {
                    ip: blocking_network_stack::ipv4::Ipv4Addr::from(ip),
                    subnet: blocking_network_stack::ipv4::Subnet {
                        gateway: blocking_network_stack::ipv4::Ipv4Addr::from(ip),
                        mask: blocking_network_stack::ipv4::Mask(24),
                    },
                    dns: None,
                    secondary_dns: None,
                },
            ),
        ));
    });
}

const SNTP_PORT: u16 = 123;
const SNTP_SERVER: Ipv4Address = Ipv4Address::new(216, 239, 35, 0); // time.google.com

/// One blocking SNTP exchange. The wall clock only matters for server
/// log correlation; failures leave the previous sync in place.
pub fn sntp_sync() {
    let _ = with_stack(|stack| {
        static mut RX_META: [smoltcp::socket::udp::PacketMetadata; 2] =
            [smoltcp::socket::udp::PacketMetadata::EMPTY; 2];
        static mut RX: [u8; 128] = [0; 128];
        static mut TX_META: [smoltcp::socket::udp::PacketMetadata; 2] =
            [smoltcp::socket::udp::PacketMetadata::EMPTY; 2];
        static mut TX: [u8; 128] = [0; 128];
        #[allow(static_mut_refs)]
        let mut socket = unsafe { stack.get_udp_socket(&mut RX_META, &mut RX, &mut TX_META, &mut TX) };
        if socket.bind(12_345).is_err() {
            return;
        }

        // Client request, version 4
        let mut packet = [0u8; 48];
        packet[0] = 0b0010_0011;
        if socket
            .send(IpAddress::Ipv4(SNTP_SERVER), SNTP_PORT, &packet)
            .is_err()
        {
            return;
        }

        let deadline =
            esp_hal::time::Instant::now() + esp_hal::time::Duration::from_millis(3000);
        let mut answer = [0u8; 128];
        loop {
            if let Ok((len, _, _)) = socket.receive(&mut answer) {
                if len >= 44 {
                    let seconds = u32::from_be_bytes([answer[40], answer[41], answer[42], answer[43]]);
                    LOGGER.info_fmt(format_args!("SNTP seconds: {}", seconds));
                }
                return;
            }
            if esp_hal::time::Instant::now() > deadline {
                return;
            }
            let _ = stack.work();
        }
    });
}

/// Drives timers and pending frames; the loop calls this every
/// iteration so long waits keep the radio serviced.
pub fn poll() {
    with_stack(|stack| {
        let _ = stack.work();
    });
}

fn with_stack<R>(f: impl FnOnce(&mut NetStack) -> R) -> Option<R> {
    critical_section::with(|cs| STACK.borrow_ref_mut(cs).as_deref_mut().map(f))
}

/// `host[:port]` out of `scheme://host[:port]/path`; plain HTTP only.
fn split_uri(uri: &str) -> Option<(&str, u16, &str)> {
    let rest = uri.split_once("://").map(|(_, rest)| rest)?;
    let (authority, path_start) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    match authority.split_once(':') {
        Some((host, port)) => Some((host, port.parse().ok()?, path_start)),
        None => Some((authority, 80, path_start)),
    }
}

fn parse_ipv4(host: &str) -> Option<Ipv4Address> {
    let mut octets = [0u8; 4];
    let mut iter = host.split('.');
    for octet in octets.iter_mut() {
        *octet = iter.next()?.parse().ok()?;
    }
    iter.next().is_none().then(|| Ipv4Address::from_bytes(&octets))
}

/// Minimal A-record lookup against the DHCP-provided resolver.
fn resolve(host: &str) -> Option<Ipv4Address> {
    if let Some(address) = parse_ipv4(host) {
        return Some(address);
    }
    with_stack(|stack| {
        stack
            .dns_query(host, smoltcp::wire::DnsQueryType::A)
            .ok()
            .and_then(|addresses| {
                addresses.first().and_then(|address| match address {
                    IpAddress::Ipv4(v4) => Some(*v4),
                })
            })
    })
    .flatten()
}

/// One buffered HTTP/1.0 exchange. Returns the negative transport codes
/// the status table classifies.
pub struct HttpExchange {
    pub method: HttpMethod,
    pub uri: String<128>,
    pub authorization: Option<String<96>>,
    pub headers: Vec<(&'static str, String<64>), 16>,
    pub timeout_ms: u32,
}

impl HttpExchange {
    pub fn send(&self, body: &[u8], collect: &[&'static str]) -> Result<SessionResponse, i32> {
        let Some((host, port, path)) = split_uri(self.uri.as_str()) else {
            return Err(codes::CONNECTION_FAILED);
        };
        let Some(address) = resolve(host) else {
            return Err(codes::NO_HTTP_SERVER);
        };

        let mut request: String<2048> = String::new();
        let _ = write!(request, "{} {} HTTP/1.0\r\n", self.method.as_str(), path);
        let _ = write!(request, "Host: {}\r\n", host);
        let _ = write!(request, "Content-Length: {}\r\n", body.len());
        if let Some(authorization) = &self.authorization {
            let _ = write!(request, "Authorization: {}\r\n", authorization);
        }
        for (name, value) in &self.headers {
            let _ = write!(request, "{}: {}\r\n", name, value);
        }
        let _ = request.push_str("\r\n");

        let outcome = with_stack(|stack| {
            static mut RX: [u8; 1536] = [0; 1536];
            static mut TX: [u8; 1536] = [0; 1536];
            // Single in-flight session per the concurrency model; the
            // buffers are never aliased
            let (rx, tx) = unsafe { (&mut *core::ptr::addr_of_mut!(RX), &mut *core::ptr::addr_of_mut!(TX)) };
            let mut socket = stack.get_socket(rx, tx);

            if socket.open(IpAddress::Ipv4(address), port).is_err() {
                return Err(codes::CONNECTION_FAILED);
            }
            if socket.write(request.as_bytes()).is_err() {
                socket.disconnect();
                return Err(codes::SEND_HEADER_FAILED);
            }
            if !body.is_empty() && socket.write(body).is_err() {
                socket.disconnect();
                return Err(codes::SEND_PAYLOAD_FAILED);
            }
            let _ = socket.flush();

            let response = read_response(
                |buffer| socket.read(buffer).map_err(|_| ()),
                self.timeout_ms,
                collect,
            );
            socket.disconnect();
            response
        });

        outcome.unwrap_or(Err(codes::NOT_CONNECTED))
    }
}

/// Non-blocking reads with explicit EOF handling: the declared length
/// bounds the read, a closed peer ends it, and the deadline catches a
/// stalled one.
fn read_response(
    mut read: impl FnMut(&mut [u8]) -> Result<usize, ()>,
    timeout_ms: u32,
    collect: &[&'static str],
) -> Result<SessionResponse, i32> {
    let deadline = esp_hal::time::Instant::now()
        + esp_hal::time::Duration::from_millis(u64::from(timeout_ms));

    let mut raw: Vec<u8, { MAX_RESPONSE_PAYLOAD + 1024 }> = Vec::new();
    let mut chunk = [0u8; 512];
    let head_end = loop {
        if esp_hal::time::Instant::now() > deadline {
            return Err(codes::READ_TIMEOUT);
        }
        match read(&mut chunk) {
            Ok(0) => break find_head_end(&raw).ok_or(codes::NO_HTTP_SERVER)?,
            Ok(count) => {
                if raw.extend_from_slice(&chunk[..count]).is_err() {
                    // Past every cap we enforce; report the declared size
                    break find_head_end(&raw).ok_or(codes::NO_HTTP_SERVER)?;
                }
                if let Some(end) = find_head_end(&raw) {
                    break end;
                }
            }
            Err(_) => return Err(codes::STREAM_WRITE),
        }
    };

    let head = core::str::from_utf8(&raw[..head_end]).map_err(|_| codes::NO_HTTP_SERVER)?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next().ok_or(codes::NO_HTTP_SERVER)?;
    let code: u16 = status_line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or(codes::NO_HTTP_SERVER)?;

    let mut response = SessionResponse::new(code, &[]);
    let mut declared_length: Option<usize> = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            declared_length = value.parse().ok();
        }
        for wanted in collect {
            if name.eq_ignore_ascii_case(wanted) {
                response = response.with_header(wanted, value);
            }
        }
    }

    // Body bytes already buffered plus whatever is still in flight,
    // bounded by the transport cap
    let mut body: Vec<u8, MAX_RESPONSE_PAYLOAD> = Vec::new();
    let already = &raw[(head_end + 4).min(raw.len())..];
    let _ = body.extend_from_slice(&already[..already.len().min(MAX_RESPONSE_PAYLOAD)]);
    while body.len() < declared_length.unwrap_or(body.len()).min(MAX_RESPONSE_PAYLOAD) {
        if esp_hal::time::Instant::now() > deadline {
            return Err(codes::READ_TIMEOUT);
        }
        match read(&mut chunk) {
            Ok(0) => break,
            Ok(count) => {
                let room = MAX_RESPONSE_PAYLOAD - body.len();
                let _ = body.extend_from_slice(&chunk[..count.min(room)]);
            }
            Err(_) => return Err(codes::STREAM_WRITE),
        }
    }

    response.content_length = declared_length.unwrap_or(body.len());
    response.payload = body;
    Ok(response)
}

fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Portal HTTP listener: accepts one connection per poll, parses the
/// request line, headers are ignored beyond Content-Length.
pub struct PortalHttp {
    port: Option<u16>,
}

impl PortalHttp {
    pub const fn new() -> Self {
        Self { port: None }
    }

    pub fn bind(&mut self, port: u16) {
        self.port = Some(port);
    }

    pub fn close(&mut self) {
        self.port = None;
    }

    pub fn next_request(&mut self) -> Option<ServerRequest> {
        let port = self.port?;
        with_stack(|stack| {
            static mut RX: [u8; 1536] = [0; 1536];
            static mut TX: [u8; 1536] = [0; 1536];
            let (rx, tx) = unsafe { (&mut *core::ptr::addr_of_mut!(RX), &mut *core::ptr::addr_of_mut!(TX)) };
            let mut socket = stack.get_socket(rx, tx);
            socket.listen(port).ok()?;
            if !socket.is_connected() {
                return None;
            }

            let mut raw: Vec<u8, 1024> = Vec::new();
            let mut chunk = [0u8; 256];
            while let Ok(count) = socket.read(&mut chunk) {
                if count == 0 || raw.extend_from_slice(&chunk[..count]).is_err() {
                    break;
                }
                if find_head_end(&raw).is_some() {
                    break;
                }
            }
            let request = parse_portal_request(&raw);
            if request.is_none() {
                socket.disconnect();
            }
            request
        })
        .flatten()
    }

    pub fn respond(&mut self, status: u16, content_type: &str, parts: &[&str]) {
        let _ = with_stack(|stack| {
            static mut RX: [u8; 512] = [0; 512];
            static mut TX: [u8; 1536] = [0; 1536];
            let (rx, tx) = unsafe { (&mut *core::ptr::addr_of_mut!(RX), &mut *core::ptr::addr_of_mut!(TX)) };
            let mut socket = stack.get_socket(rx, tx);

            let length: usize = parts.iter().map(|part| part.len()).sum();
            let mut head: String<256> = String::new();
            let _ = write!(
                head,
                "HTTP/1.0 {} \r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
                status, content_type, length
            );
            let _ = socket.write(head.as_bytes());
            for part in parts {
                let _ = socket.write(part.as_bytes());
            }
            let _ = socket.flush();
            socket.disconnect();
        });
    }

    pub fn redirect(&mut self, location: &str) {
        let _ = with_stack(|stack| {
            static mut RX: [u8; 512] = [0; 512];
            static mut TX: [u8; 512] = [0; 512];
            let (rx, tx) = unsafe { (&mut *core::ptr::addr_of_mut!(RX), &mut *core::ptr::addr_of_mut!(TX)) };
            let mut socket = stack.get_socket(rx, tx);
            let mut head: String<128> = String::new();
            let _ = write!(
                head,
                "HTTP/1.0 302 \r\nLocation: {}\r\nContent-Length: 0\r\n\r\n",
                location
            );
            let _ = socket.write(head.as_bytes());
            let _ = socket.flush();
            socket.disconnect();
        });
    }
}

fn parse_portal_request(raw: &[u8]) -> Option<ServerRequest> {
    let head_end = find_head_end(raw)?;
    let head = core::str::from_utf8(&raw[..head_end]).ok()?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut pieces = request_line.split(' ');
    let method = pieces.next()?;
    let path = pieces.next()?;

    match method {
        "POST" => {
            let body = &raw[(head_end + 4).min(raw.len())..];
            Some(ServerRequest::post(
                path,
                &body[..body.len().min(SERVER_BODY_CAPACITY)],
            ))
        }
        _ => Some(ServerRequest::get(path)),
    }
}

/// Captive DNS: answers every A query with the portal address.
pub struct HijackDns {
    config: Option<(u16, [u8; 4])>,
}

impl HijackDns {
    pub const fn new() -> Self {
        Self { config: None }
    }

    pub fn start(&mut self, port: u16, ip: [u8; 4]) {
        self.config = Some((port, ip));
    }

    pub fn stop(&mut self) {
        self.config = None;
    }

    pub fn process(&mut self) {
        let Some((port, ip)) = self.config else {
            return;
        };
        let _ = with_stack(|stack| {
            static mut RX_META: [smoltcp::socket::udp::PacketMetadata; 4] =
                [smoltcp::socket::udp::PacketMetadata::EMPTY; 4];
            static mut RX: [u8; 512] = [0; 512];
            static mut TX_META: [smoltcp::socket::udp::PacketMetadata; 4] =
                [smoltcp::socket::udp::PacketMetadata::EMPTY; 4];
            static mut TX: [u8; 512] = [0; 512];
            #[allow(static_mut_refs)]
            let mut socket = unsafe {
                stack.get_udp_socket(&mut RX_META, &mut RX, &mut TX_META, &mut TX)
            };
            if socket.bind(port).is_err() {
                return;
            }

            let mut query = [0u8; 512];
            if let Ok((len, source, source_port)) = socket.receive(&mut query) {
                if let Some(answer) = answer_with(&query[..len], ip) {
                    let _ = socket.send(source, source_port, &answer);
                }
            }
        });
    }
}

/// Builds an A-record answer mirroring the query, resolving every name
/// to `ip`.
fn answer_with(query: &[u8], ip: [u8; 4]) -> Option<Vec<u8, 512>> {
    if query.len() < 12 {
        return None;
    }
    let mut answer: Vec<u8, 512> = Vec::new();
    answer.extend_from_slice(query).ok()?;
    // QR = response, RA = set; answer count = 1
    answer[2] |= 0x80;
    answer[3] |= 0x80;
    answer[6] = 0;
    answer[7] = 1;

    // Name pointer to the question, type A, class IN, short TTL
    answer
        .extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3C])
        .ok()?;
    answer.extend_from_slice(&[0x00, 0x04]).ok()?;
    answer.extend_from_slice(&ip).ok()?;
    Some(answer)
}

/// Streams `/v1/update` into the passive app partition and reboots on
/// success. The image is far larger than the session cap, so this path
/// never goes through [`HttpExchange`]; chunks go straight to flash.
pub fn ota_update(uri: &str, token: &str, current_version: &str) -> Result<bool, i32> {
    let Some((host, port, path)) = split_uri(uri) else {
        return Err(codes::CONNECTION_FAILED);
    };
    let Some(address) = resolve(host) else {
        return Err(codes::NO_HTTP_SERVER);
    };

    let mut request: String<512> = String::new();
    let _ = write!(request, "GET {} HTTP/1.0\r\n", path);
    let _ = write!(request, "Host: {}\r\n", host);
    let _ = write!(request, "Authorization: Basic {}\r\n", token);
    let _ = write!(request, "VERSION: {}\r\n", current_version);
    let _ = request.push_str("Content-Length: 0\r\n\r\n");

    let outcome = with_stack(|stack| {
        static mut RX: [u8; 4096] = [0; 4096];
        static mut TX: [u8; 1024] = [0; 1024];
        let (rx, tx) = unsafe { (&mut *core::ptr::addr_of_mut!(RX), &mut *core::ptr::addr_of_mut!(TX)) };
        let mut socket = stack.get_socket(rx, tx);

        if socket.open(IpAddress::Ipv4(address), port).is_err() {
            return Err(codes::CONNECTION_FAILED);
        }
        if socket.write(request.as_bytes()).is_err() || socket.flush().is_err() {
            socket.disconnect();
            return Err(codes::SEND_HEADER_FAILED);
        }

        // Head first, then chunks straight to the passive partition
        let mut raw: Vec<u8, 2048> = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            match socket.read(&mut chunk) {
                Ok(0) => {
                    socket.disconnect();
                    return Err(codes::NO_HTTP_SERVER);
                }
                Ok(count) => {
                    if raw.extend_from_slice(&chunk[..count]).is_err() {
                        socket.disconnect();
                        return Err(codes::NO_HTTP_SERVER);
                    }
                    if let Some(end) = find_head_end(&raw) {
                        break end;
                    }
                }
                Err(_) => {
                    socket.disconnect();
                    return Err(codes::STREAM_WRITE);
                }
            }
        };

        let head = core::str::from_utf8(&raw[..head_end]).map_err(|_| codes::NO_HTTP_SERVER)?;
        let code: u16 = head
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or(codes::NO_HTTP_SERVER)?;
        match code {
            200 => {}
            304 => {
                socket.disconnect();
                return Ok(false);
            }
            other => {
                socket.disconnect();
                return Err(i32::from(other));
            }
        }

        LOGGER.info("Writing firmware image");
        let mut offset = 0usize;
        let first = &raw[head_end + 4..];
        crate::platform::write_ota_chunk(offset, first)?;
        offset += first.len();
        loop {
            match socket.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => {
                    crate::platform::write_ota_chunk(offset, &chunk[..count])?;
                    offset += count;
                }
                Err(_) => {
                    socket.disconnect();
                    return Err(codes::STREAM_WRITE);
                }
            }
        }
        socket.disconnect();
        crate::platform::commit_ota(offset)?;
        Ok(true)
    });

    match outcome.unwrap_or(Err(codes::NOT_CONNECTED)) {
        Ok(true) => crate::platform::reboot(),
        other => other,
    }
}
