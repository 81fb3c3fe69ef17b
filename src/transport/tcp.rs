//! TCP transport implementation
//!
//! Provides plain TCP connections to the first hop, or to the destination
//! itself when a session bypasses the chain.

use super::{SocketOpts, Transport};
use crate::config::Config;
use crate::helper::{duration_from_millis, DEFAULT_CONNECT_TIMEOUT_MS};
use crate::proto::TargetAddr;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout, name resolution included
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: duration_from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    /// Create a TCP transport from the configuration
    pub fn from_config(config: &Config) -> Self {
        TcpTransport {
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            connect_timeout: config.timeouts().connect,
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, addr: &TargetAddr) -> io::Result<Self::Stream> {
        let connect = async {
            let resolved = addr.resolve_all().await?;
            connect_any(&resolved).await
        };

        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection to {} timed out", addr),
                )
            })??;

        // Apply socket options
        self.socket_opts.apply(&stream)?;

        tracing::debug!("TCP connection established to {}", addr);

        Ok(stream)
    }
}

/// Connect to the first address that accepts, in order
///
/// A name often resolves to both `::1` and `127.0.0.1` while the proxy
/// listens on only one of them.
async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Connection to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to connect to")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_transport_with_defaults() {
        let transport = TcpTransport::with_defaults();
        assert!(transport.socket_opts.nodelay);
        assert_eq!(transport.connect_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_tcp_transport_with_socket_opts() {
        let opts = SocketOpts {
            nodelay: false,
            keepalive_secs: Some(60),
            keepalive_interval: Some(20),
        };
        let transport = TcpTransport::with_defaults().with_socket_opts(opts.clone());
        assert!(!transport.socket_opts.nodelay);
        assert_eq!(transport.socket_opts.keepalive_secs, Some(60));
    }

    #[test]
    fn test_tcp_transport_from_config() {
        let config = Config {
            tcp_connect_timeout: 1500,
            ..Default::default()
        };
        let transport = TcpTransport::from_config(&config);
        assert_eq!(transport.connect_timeout, Duration::from_millis(1500));
        assert!(transport.socket_opts.nodelay);
    }

    #[tokio::test]
    async fn test_tcp_transport_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::with_defaults();
        let stream = transport.connect(&TargetAddr::from(addr)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_tcp_transport_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport =
            TcpTransport::with_defaults().with_connect_timeout(Duration::from_millis(500));
        let result = transport
            .connect(&TargetAddr::ipv4(Ipv4Addr::LOCALHOST, port))
            .await;

        assert_eq!(
            result.unwrap_err().kind(),
            io::ErrorKind::ConnectionRefused
        );
    }

    #[tokio::test]
    async fn test_connect_any_skips_dead_addresses() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_addr = listener.local_addr().unwrap();

        let stream = connect_any(&[dead_addr, live_addr]).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live_addr);

        let err = connect_any(&[dead_addr]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
