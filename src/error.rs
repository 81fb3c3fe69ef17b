//! Error types for Proxyc
//!
//! Chain negotiation errors are structured rather than opaque strings: every
//! failure carries an [`ErrorKind`], the [`Stage`] of the chain that failed and,
//! when there is one, the underlying I/O cause.

use crate::proto::socks5::*;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failure reported by a hop when it could not reach its next target.
///
/// Mirrors the RFC1928 reply codes; HTTP statuses and local connect errors
/// are folded into the same set.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopFailure {
    /// General SOCKS server failure
    #[error("general failure")]
    GeneralFailure,
    /// Connection not allowed by ruleset
    #[error("connection not allowed")]
    ConnectionNotAllowed,
    /// Network unreachable
    #[error("network unreachable")]
    NetworkUnreachable,
    /// Host unreachable
    #[error("host unreachable")]
    HostUnreachable,
    /// Connection refused
    #[error("connection refused")]
    ConnectionRefused,
    /// TTL expired
    #[error("TTL expired")]
    TtlExpired,
    /// Command not supported
    #[error("command not supported")]
    CommandNotSupported,
    /// Address type not supported
    #[error("address type not supported")]
    AddressTypeNotSupported,
    /// Reply code outside of the RFC1928 range
    #[error("unassigned reply code {0:#04x}")]
    Unassigned(u8),
}

impl HopFailure {
    /// Map a SOCKS5 reply code, `None` meaning success
    pub fn from_reply(code: u8) -> Option<Self> {
        let failure = match code {
            SOCKS5_REPLY_SUCCEEDED => return None,
            SOCKS5_REPLY_GENERAL_FAILURE => HopFailure::GeneralFailure,
            SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => HopFailure::ConnectionNotAllowed,
            SOCKS5_REPLY_NETWORK_UNREACHABLE => HopFailure::NetworkUnreachable,
            SOCKS5_REPLY_HOST_UNREACHABLE => HopFailure::HostUnreachable,
            SOCKS5_REPLY_CONNECTION_REFUSED => HopFailure::ConnectionRefused,
            SOCKS5_REPLY_TTL_EXPIRED => HopFailure::TtlExpired,
            SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => HopFailure::CommandNotSupported,
            SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => HopFailure::AddressTypeNotSupported,
            other => HopFailure::Unassigned(other),
        };
        Some(failure)
    }

    /// SOCKS5 reply code for this failure
    pub fn reply_code(self) -> u8 {
        match self {
            HopFailure::GeneralFailure => SOCKS5_REPLY_GENERAL_FAILURE,
            HopFailure::ConnectionNotAllowed => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
            HopFailure::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
            HopFailure::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
            HopFailure::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
            HopFailure::TtlExpired => SOCKS5_REPLY_TTL_EXPIRED,
            HopFailure::CommandNotSupported => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            HopFailure::AddressTypeNotSupported => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            HopFailure::Unassigned(_) => SOCKS5_REPLY_GENERAL_FAILURE,
        }
    }

    /// Map a non-2xx status line from an HTTP proxy
    pub fn from_http_status(status: u16) -> Self {
        match status {
            403 => HopFailure::ConnectionNotAllowed,
            404 | 502 => HopFailure::HostUnreachable,
            503 => HopFailure::ConnectionRefused,
            504 => HopFailure::TtlExpired,
            405 | 501 => HopFailure::CommandNotSupported,
            _ => HopFailure::GeneralFailure,
        }
    }
}

impl From<&io::Error> for HopFailure {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => HopFailure::ConnectionRefused,
            io::ErrorKind::TimedOut => HopFailure::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => HopFailure::HostUnreachable,
            io::ErrorKind::PermissionDenied => HopFailure::ConnectionNotAllowed,
            _ => match err.raw_os_error() {
                Some(code) if code == NETWORK_UNREACHABLE_ERRNO => HopFailure::NetworkUnreachable,
                Some(code) if code == HOST_UNREACHABLE_ERRNO => HopFailure::HostUnreachable,
                _ => HopFailure::GeneralFailure,
            },
        }
    }
}

#[cfg(target_os = "linux")]
const NETWORK_UNREACHABLE_ERRNO: i32 = 101;
#[cfg(target_os = "linux")]
const HOST_UNREACHABLE_ERRNO: i32 = 113;
#[cfg(not(target_os = "linux"))]
const NETWORK_UNREACHABLE_ERRNO: i32 = 51;
#[cfg(not(target_os = "linux"))]
const HOST_UNREACHABLE_ERRNO: i32 = 65;

/// Kind of a handshake or chain failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unexpected frame from either peer
    #[error("protocol violation")]
    ProtocolViolation,
    /// The remote demands authentication that was not supplied
    #[error("authentication required")]
    AuthRequired,
    /// The supplied credentials were rejected
    #[error("authentication failed")]
    AuthFailed,
    /// The hop could not reach its next target
    #[error("{0}")]
    Hop(HopFailure),
    /// Connect or handshake exceeded its deadline
    #[error("timed out")]
    Timeout,
    /// The peer closed the connection in the middle of a handshake
    #[error("connection closed during handshake")]
    TransportClosed,
}

/// Errors raised while encoding or decoding protocol frames
#[derive(Error, Debug)]
pub enum CodecError {
    /// Unsupported protocol version
    #[error("unsupported version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Unknown SOCKS5 address type
    #[error("address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    /// Unknown SOCKS5 command
    #[error("command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    /// A length-prefixed field is empty or too long
    #[error("invalid {0} length: {1}")]
    InvalidLength(&'static str, usize),

    /// A text field is not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Malformed HTTP request or response head
    #[error("malformed HTTP message: {0}")]
    MalformedHttp(String),

    /// HTTP head did not terminate within the size limit
    #[error("HTTP head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// IO error while reading or writing a frame
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of a single hop handshake (or of a plain connect)
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct HandshakeError {
    kind: ErrorKind,
    #[source]
    source: Option<io::Error>,
}

impl HandshakeError {
    /// Create an error without an underlying cause
    pub fn new(kind: ErrorKind) -> Self {
        HandshakeError { kind, source: None }
    }

    /// Create an error caused by an I/O error
    pub fn with_source(kind: ErrorKind, source: io::Error) -> Self {
        HandshakeError {
            kind,
            source: Some(source),
        }
    }

    /// Classify a failed TCP connect
    pub fn connect(source: io::Error) -> Self {
        let kind = if source.kind() == io::ErrorKind::TimedOut {
            ErrorKind::Timeout
        } else {
            ErrorKind::Hop(HopFailure::from(&source))
        };
        HandshakeError::with_source(kind, source)
    }

    /// Kind of the failure
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Underlying I/O cause, if any
    pub fn io_source(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

impl From<io::Error> for HandshakeError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::TransportClosed,
        };
        HandshakeError::with_source(kind, err)
    }
}

impl From<CodecError> for HandshakeError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e.into(),
            other => HandshakeError::with_source(
                ErrorKind::ProtocolViolation,
                io::Error::new(io::ErrorKind::InvalidData, other),
            ),
        }
    }
}

/// Position in the chain where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Direct connection to the destination (empty chain)
    Direct,
    /// Hop with the given index, 0 being dialed first
    Hop(usize),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Direct => write!(f, "direct connection"),
            Stage::Hop(index) => write!(f, "hop {}", index),
        }
    }
}

/// A chain negotiation failure, tagged with the failing stage
#[derive(Error, Debug)]
#[error("{stage} failed")]
pub struct ChainError {
    stage: Stage,
    #[source]
    error: HandshakeError,
}

impl ChainError {
    /// Tag a handshake error with the stage it happened at
    pub fn new(stage: Stage, error: HandshakeError) -> Self {
        ChainError { stage, error }
    }

    /// Stage that failed
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Index of the failing hop, `None` for a direct connection
    pub fn hop(&self) -> Option<usize> {
        match self.stage {
            Stage::Hop(index) => Some(index),
            Stage::Direct => None,
        }
    }

    /// Kind of the failure
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Underlying I/O cause, if any
    pub fn io_source(&self) -> Option<&io::Error> {
        self.error.io_source()
    }
}

/// Errors raised while parsing hops and configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The proxy URL could not be parsed
    #[error("invalid proxy URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    /// Scheme other than socks5 or http
    #[error("unsupported proxy scheme {0:?}")]
    UnsupportedScheme(String),

    /// URL without host
    #[error("missing host in {0:?}")]
    MissingHost(String),

    /// URL without port
    #[error("missing port in {0:?}")]
    MissingPort(String),

    /// Unusable username/password
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Any other invalid setting
    #[error("{0}")]
    Invalid(String),
}
