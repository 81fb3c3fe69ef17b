//! HTTP/1.1 proxy messages
//!
//! Only the head of a message is ever parsed: CONNECT requests and their
//! responses, and absolute-form requests that are forwarded to an origin.

use super::TargetAddr;
use crate::config::Credentials;
use crate::error::CodecError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a request or response head
pub const MAX_HEAD_SIZE: usize = 8192;

/// Header terminator
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Hop-by-hop headers dropped when forwarding; `Connection` is replaced
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "proxy-authorization",
    "proxy-connection",
    "connection",
    "keep-alive",
];

/// Parsed status line of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code
    pub status: u16,
    /// Reason phrase, possibly empty
    pub reason: String,
}

impl ResponseHead {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `CONNECT`
    pub method: String,
    /// Request target as written on the request line
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`
    pub version: String,
    /// Header fields in order of appearance
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// First value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether this is a CONNECT request
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Rewrite an absolute-form request into origin form for `path`.
    ///
    /// Hop-by-hop headers, and any header the client listed in `Connection`,
    /// are dropped. The rewritten request carries `Connection: close`: a
    /// forwarded session serves one request, so the origin must close after
    /// its response and the client reconnects for its next request.
    pub fn to_origin_form(&self, path: &str) -> Vec<u8> {
        let listed: Vec<String> = self
            .headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("connection"))
            .flat_map(|(_, value)| value.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        let mut buf = Vec::with_capacity(256);
        buf.put_slice(format!("{} {} {}\r\n", self.method, path, self.version).as_bytes());
        for (key, value) in &self.headers {
            let lower = key.to_ascii_lowercase();
            if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || listed.contains(&lower) {
                continue;
            }
            buf.put_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        buf.put_slice(b"Connection: close\r\n\r\n");
        buf
    }
}

/// Encode a CONNECT request for `target`
pub fn encode_connect_request(target: &TargetAddr, credentials: Option<&Credentials>) -> Vec<u8> {
    let authority = format!("{}:{}", target.host(), target.port());
    let mut request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n",
        authority = authority
    );
    if let Some(credentials) = credentials {
        request.push_str(&format!(
            "Proxy-Authorization: {}\r\n",
            basic_auth(credentials)
        ));
    }
    request.push_str("\r\n");
    request.into_bytes()
}

/// Encode a response with no body
pub fn encode_response(status: u16, reason: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (key, value) in headers {
        response.push_str(&format!("{}: {}\r\n", key, value));
    }
    if status != 200 {
        response.push_str("Content-Length: 0\r\nConnection: close\r\n");
    }
    response.push_str("\r\n");
    response.into_bytes()
}

/// `Basic` credentials for a Proxy-Authorization header
pub fn basic_auth(credentials: &Credentials) -> String {
    let token = STANDARD.encode(format!(
        "{}:{}",
        credentials.username, credentials.password
    ));
    format!("Basic {}", token)
}

/// Decode a `Basic` Proxy-Authorization value
pub fn parse_basic_auth(value: &str) -> Option<Credentials> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(token.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials::new(username, password))
}

/// Read a message head up to and including the blank line.
///
/// `initial` holds bytes already consumed from the reader. The head is read
/// one byte at a time so nothing past the terminator is taken from the
/// stream; whatever follows belongs to the tunnel.
pub async fn read_head<R>(reader: &mut R, initial: &[u8]) -> Result<BytesMut, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut head = BytesMut::with_capacity(512);
    head.put_slice(initial);

    while !head.ends_with(HEAD_END) {
        if head.len() >= MAX_HEAD_SIZE {
            return Err(CodecError::HeadTooLarge(MAX_HEAD_SIZE));
        }
        let byte = reader.read_u8().await?;
        head.put_u8(byte);
    }

    Ok(head)
}

/// Parse a response head
pub fn parse_response_head(head: &[u8]) -> Result<ResponseHead, CodecError> {
    let text = head_text(head)?;
    let status_line = text.lines().next().unwrap_or_default();

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(CodecError::MalformedHttp(format!(
            "bad status line {:?}",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| CodecError::MalformedHttp(format!("bad status line {:?}", status_line)))?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    Ok(ResponseHead { status, reason })
}

/// Parse a request head
pub fn parse_request_head(head: &[u8]) -> Result<RequestHead, CodecError> {
    let text = head_text(head)?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) if version.starts_with("HTTP/1.") => {
            (method, target, version)
        }
        _ => {
            return Err(CodecError::MalformedHttp(format!(
                "bad request line {:?}",
                request_line
            )))
        }
    };

    let mut headers = Vec::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHttp(format!("bad header {:?}", line)))?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
    })
}

/// Parse a CONNECT authority (`host:port`, `[v6]:port`)
pub fn parse_authority(authority: &str) -> Result<TargetAddr, CodecError> {
    let bad = || CodecError::MalformedHttp(format!("bad authority {:?}", authority));

    let (host, port) = authority.rsplit_once(':').ok_or_else(bad)?;
    let port = port.parse::<u16>().map_err(|_| bad())?;
    if host.is_empty() || (host.contains(':') && !host.starts_with('[')) {
        return Err(bad());
    }

    Ok(TargetAddr::from_host(host, port))
}

/// Split an absolute-form `http://` target into destination and origin-form path
pub fn parse_absolute_uri(target: &str) -> Result<(TargetAddr, String), CodecError> {
    let bad = || CodecError::MalformedHttp(format!("bad request target {:?}", target));

    let url = url::Url::parse(target).map_err(|_| bad())?;
    if url.scheme() != "http" {
        return Err(bad());
    }
    let host = url.host_str().ok_or_else(bad)?;
    let port = url.port_or_known_default().ok_or_else(bad)?;

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok((TargetAddr::from_host(host, port), path))
}

fn head_text(head: &[u8]) -> Result<&str, CodecError> {
    std::str::from_utf8(head).map_err(|_| CodecError::InvalidUtf8("HTTP head"))
}
