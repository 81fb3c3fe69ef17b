//! SOCKS5 wire format
//!
//! Frames of RFC1928 (greeting, method selection, request, reply) and of the
//! RFC1929 username/password subnegotiation. Encoders build complete frames;
//! decoders borrow a reader and consume exactly one frame from it.

use super::TargetAddr;
use crate::config::Credentials;
use crate::error::CodecError;
use bytes::BufMut;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS5 authentication sub-negotiation version
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

/// Subnegotiation status: success
pub const SOCKS5_AUTH_SUCCESS: u8 = 0x00;
/// Subnegotiation status: failure
pub const SOCKS5_AUTH_FAILURE: u8 = 0x01;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
/// TCP BIND command (not supported)
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
/// UDP ASSOCIATE command (not supported)
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reply codes
/// Succeeded
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
/// General SOCKS server failure
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
/// Network unreachable
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
/// Host unreachable
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
/// TTL expired
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
/// Command not supported
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;

/// Maximum RFC1929 username or password length
pub const MAX_CREDENTIAL_LEN: usize = 255;

/// A decoded SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Raw command byte
    pub command: u8,
    /// Requested destination
    pub target: TargetAddr,
}

/// A decoded SOCKS5 reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code, `0x00` on success
    pub code: u8,
    /// Bound address announced by the server
    pub bound: TargetAddr,
}

/// Methods a client offers, password only when it has credentials
pub fn greeting_methods(with_password: bool) -> Vec<u8> {
    if with_password {
        vec![SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD]
    } else {
        vec![SOCKS5_AUTH_METHOD_NONE]
    }
}

/// Encode a client greeting
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
pub fn encode_greeting(methods: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + methods.len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(methods.len() as u8);
    buf.put_slice(methods);
    buf
}

/// Read the method list of a client greeting whose version byte was already consumed
pub async fn read_greeting_methods<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let num_methods = reader.read_u8().await? as usize;
    if num_methods == 0 {
        return Err(CodecError::InvalidLength("method list", 0));
    }

    let mut methods = vec![0u8; num_methods];
    reader.read_exact(&mut methods).await?;
    Ok(methods)
}

/// Encode the server's method selection
pub fn encode_method_selection(method: u8) -> [u8; 2] {
    [SOCKS5_VERSION, method]
}

/// Read the server's method selection
pub async fn read_method_selection<R>(reader: &mut R) -> Result<u8, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).await?;
    if buf[0] != SOCKS5_VERSION {
        return Err(CodecError::UnsupportedVersion(buf[0]));
    }
    Ok(buf[1])
}

/// Encode a username/password subnegotiation request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub fn encode_auth_request(credentials: &Credentials) -> Result<Vec<u8>, CodecError> {
    let username = credentials.username.as_bytes();
    let password = credentials.password.as_bytes();
    check_field_len("username", username.len())?;
    check_field_len("password", password.len())?;

    let mut buf = Vec::with_capacity(3 + username.len() + password.len());
    buf.put_u8(SOCKS5_AUTH_VERSION);
    buf.put_u8(username.len() as u8);
    buf.put_slice(username);
    buf.put_u8(password.len() as u8);
    buf.put_slice(password);
    Ok(buf)
}

/// Read a username/password subnegotiation request
pub async fn read_auth_request<R>(reader: &mut R) -> Result<Credentials, CodecError>
where
    R: AsyncRead + Unpin,
{
    let version = reader.read_u8().await?;
    if version != SOCKS5_AUTH_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let username = read_short_string(reader, "username").await?;
    let password = read_short_string(reader, "password").await?;
    Ok(Credentials::new(username, password))
}

/// Encode a subnegotiation status
pub fn encode_auth_status(status: u8) -> [u8; 2] {
    [SOCKS5_AUTH_VERSION, status]
}

/// Read a subnegotiation status
pub async fn read_auth_status<R>(reader: &mut R) -> Result<u8, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).await?;
    if buf[0] != SOCKS5_AUTH_VERSION {
        return Err(CodecError::UnsupportedVersion(buf[0]));
    }
    Ok(buf[1])
}

/// Encode a request
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn encode_request(command: u8, target: &TargetAddr) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(22);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(command);
    buf.put_u8(SOCKS5_RESERVED);
    put_address(&mut buf, target)?;
    Ok(buf)
}

/// Read a request
pub async fn read_request<R>(reader: &mut R) -> Result<Request, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(CodecError::UnsupportedVersion(header[0]));
    }

    let target = read_address(reader, header[3]).await?;
    Ok(Request {
        command: header[1],
        target,
    })
}

/// Encode a reply; the layout matches the request with REP in place of CMD
pub fn encode_reply(code: u8, bound: &TargetAddr) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(22);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(code);
    buf.put_u8(SOCKS5_RESERVED);
    put_address(&mut buf, bound)?;
    Ok(buf)
}

/// Read a reply.
///
/// Some servers close right after a failure code without sending the bound
/// address; the failure code is still returned in that case.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(CodecError::UnsupportedVersion(header[0]));
    }

    let code = header[1];
    let bound = match read_address(reader, header[3]).await {
        Ok(bound) => bound,
        Err(CodecError::Io(e))
            if code != SOCKS5_REPLY_SUCCEEDED && e.kind() == io::ErrorKind::UnexpectedEof =>
        {
            TargetAddr::default()
        }
        Err(e) => return Err(e),
    };

    Ok(Reply { code, bound })
}

fn put_address(buf: &mut Vec<u8>, target: &TargetAddr) -> Result<(), CodecError> {
    match target {
        TargetAddr::Ip(std::net::SocketAddr::V4(addr)) => {
            buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
        }
        TargetAddr::Ip(std::net::SocketAddr::V6(addr)) => {
            buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
        }
        TargetAddr::Domain(domain, port) => {
            if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
                return Err(CodecError::InvalidLength("domain", domain.len()));
            }
            buf.put_u8(SOCKS5_ADDR_TYPE_DOMAIN);
            buf.put_u8(domain.len() as u8);
            buf.put_slice(domain.as_bytes());
            buf.put_u16(*port);
        }
    }
    Ok(())
}

async fn read_address<R>(reader: &mut R, addr_type: u8) -> Result<TargetAddr, CodecError>
where
    R: AsyncRead + Unpin,
{
    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            reader.read_exact(&mut addr).await?;
            let port = reader.read_u16().await?;
            Ok(TargetAddr::ipv4(Ipv4Addr::from(addr), port))
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let domain = read_short_string(reader, "domain").await?;
            let port = reader.read_u16().await?;
            Ok(TargetAddr::Domain(domain, port))
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            reader.read_exact(&mut addr).await?;
            let port = reader.read_u16().await?;
            Ok(TargetAddr::ipv6(Ipv6Addr::from(addr), port))
        }
        other => Err(CodecError::AddressTypeNotSupported(other)),
    }
}

async fn read_short_string<R>(reader: &mut R, field: &'static str) -> Result<String, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u8().await? as usize;
    if len == 0 {
        return Err(CodecError::InvalidLength(field, len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8(field))
}

fn check_field_len(field: &'static str, len: usize) -> Result<(), CodecError> {
    if len == 0 || len > MAX_CREDENTIAL_LEN {
        return Err(CodecError::InvalidLength(field, len));
    }
    Ok(())
}
