//! Client handshake dispatch
//!
//! The first byte decides the protocol: `0x05` is a SOCKS5 greeting,
//! anything else is taken as the start of an HTTP request line.

use super::http::HttpSession;
use super::socks5::Socks5Session;
use crate::config::Credentials;
use crate::error::{ChainError, HandshakeError};
use crate::proto::socks5::SOCKS5_VERSION;
use crate::proto::TargetAddr;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// A client handshake waiting for its tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientHandshake {
    /// SOCKS5 CONNECT
    Socks5(Socks5Session),
    /// HTTP CONNECT or forward request
    Http(HttpSession),
}

impl ClientHandshake {
    /// Detect the protocol and read the client's request
    pub async fn accept<S>(
        stream: &mut S,
        credentials: Option<&Credentials>,
    ) -> Result<Self, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let first = stream.read_u8().await?;
        if first == SOCKS5_VERSION {
            Ok(ClientHandshake::Socks5(
                Socks5Session::accept(stream, credentials).await?,
            ))
        } else {
            Ok(ClientHandshake::Http(
                HttpSession::accept(stream, first, credentials).await?,
            ))
        }
    }

    /// Requested destination
    pub fn target(&self) -> &TargetAddr {
        match self {
            ClientHandshake::Socks5(session) => session.target(),
            ClientHandshake::Http(session) => session.target(),
        }
    }

    /// Tell the client its tunnel is up; only called once the whole chain is connected
    pub async fn send_success<S, T>(&self, client: &mut S, tunnel: &mut T) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
        T: AsyncWrite + Unpin,
    {
        match self {
            ClientHandshake::Socks5(session) => session.send_success(client).await,
            ClientHandshake::Http(session) => session.send_success(client, tunnel).await,
        }
    }

    /// Answer a chain failure with the protocol's own failure code
    pub async fn send_failure<S>(&self, client: &mut S, err: &ChainError) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self {
            ClientHandshake::Socks5(session) => session.send_failure(client, err.kind()).await,
            ClientHandshake::Http(session) => session.send_failure(client, err.kind()).await,
        }
    }
}

impl fmt::Display for ClientHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientHandshake::Socks5(_) => write!(f, "SOCKS5"),
            ClientHandshake::Http(session) if session.is_forward() => write!(f, "HTTP"),
            ClientHandshake::Http(_) => write!(f, "HTTP CONNECT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, HopFailure, Stage};
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_detect_socks5() {
        let mut mock = Builder::new()
            .read(&[5, 1, 0])
            .write(&[5, 0])
            .read(&[5, 1, 0, 3, 1, b'a', 0, 80])
            .build();

        let handshake = ClientHandshake::accept(&mut mock, None).await.unwrap();
        assert!(matches!(handshake, ClientHandshake::Socks5(_)));
        assert_eq!(handshake.target(), &TargetAddr::domain("a", 80));
        assert_eq!(handshake.to_string(), "SOCKS5");
    }

    #[tokio::test]
    async fn test_detect_http() {
        let mut mock = Builder::new()
            .read(b"CONNECT a:443 HTTP/1.1\r\n\r\n")
            .build();

        let handshake = ClientHandshake::accept(&mut mock, None).await.unwrap();
        assert!(matches!(handshake, ClientHandshake::Http(_)));
        assert_eq!(handshake.target(), &TargetAddr::domain("a", 443));
        assert_eq!(handshake.to_string(), "HTTP CONNECT");
    }

    #[tokio::test]
    async fn test_closed_before_first_byte() {
        let mut mock = Builder::new().build();
        let err = ClientHandshake::accept(&mut mock, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportClosed);
    }

    #[tokio::test]
    async fn test_send_failure_dispatch() {
        let mut mock = Builder::new()
            .read(b"CONNECT a:443 HTTP/1.1\r\n\r\n")
            .write(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();

        let handshake = ClientHandshake::accept(&mut mock, None).await.unwrap();
        let err = ChainError::new(
            Stage::Hop(0),
            HandshakeError::new(ErrorKind::Hop(HopFailure::ConnectionRefused)),
        );
        handshake.send_failure(&mut mock, &err).await.unwrap();
    }
}
