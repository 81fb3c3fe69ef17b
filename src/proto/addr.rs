//! Target address type
//!
//! A destination as requested by a client or named by a hop: either an IP
//! socket address or a domain name that is resolved by whoever dials it.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Target address of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        TargetAddr::Domain(domain.into(), port)
    }

    /// Build from a host string, keeping IP literals as IPs.
    ///
    /// Accepts bracketed IPv6 literals (`[::1]`).
    pub fn from_host(host: &str, port: u16) -> Self {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        match bare.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(_) => TargetAddr::Domain(host.to_string(), port),
        }
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Get the IP address, if this is not a domain
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            TargetAddr::Ip(addr) => Some(addr.ip()),
            TargetAddr::Domain(..) => None,
        }
    }

    /// Host part as written in an HTTP authority (IPv6 in brackets)
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => addr.ip().to_string(),
            TargetAddr::Ip(SocketAddr::V6(addr)) => format!("[{}]", addr.ip()),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    /// Resolve the address to every SocketAddr it stands for
    ///
    /// For IP addresses, this returns immediately.
    /// For domain names, this performs DNS resolution, keeping the
    /// resolver's order.
    pub async fn resolve_all(&self) -> io::Result<Vec<SocketAddr>> {
        match self {
            TargetAddr::Ip(addr) => Ok(vec![*addr]),
            TargetAddr::Domain(domain, port) => {
                let addrs: Vec<SocketAddr> =
                    tokio::net::lookup_host((domain.as_str(), *port)).await?.collect();
                if addrs.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("no addresses found for {}", domain),
                    ));
                }
                Ok(addrs)
            }
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_addr_constructors() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(192, 168, 1, 1), 8080);
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.ip(), Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));

        let addr = TargetAddr::domain("example.com", 80);
        assert_eq!(addr.port(), 80);
        assert_eq!(addr.ip(), None);
    }

    #[test]
    fn test_target_addr_from_host() {
        assert_eq!(
            TargetAddr::from_host("127.0.0.1", 1080),
            TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 1080)
        );
        assert_eq!(
            TargetAddr::from_host("[::1]", 443),
            TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 443)
        );
        assert_eq!(
            TargetAddr::from_host("::1", 443),
            TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 443)
        );
        assert_eq!(
            TargetAddr::from_host("proxy.local", 3128),
            TargetAddr::domain("proxy.local", 3128)
        );
    }

    #[test]
    fn test_target_addr_host() {
        assert_eq!(TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 1).host(), "127.0.0.1");
        assert_eq!(TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 1).host(), "[::1]");
        assert_eq!(TargetAddr::domain("a.b", 1).host(), "a.b");
    }

    #[test]
    fn test_target_addr_display() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(127, 0, 0, 1), 8080);
        assert_eq!(format!("{}", addr), "127.0.0.1:8080");

        let addr = TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 80);
        assert_eq!(format!("{}", addr), "[::1]:80");

        let addr = TargetAddr::domain("test.com", 443);
        assert_eq!(format!("{}", addr), "test.com:443");
    }

    #[tokio::test]
    async fn test_target_addr_resolve_ip() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(127, 0, 0, 1), 8080);
        let resolved = addr.resolve_all().await.unwrap();
        assert_eq!(resolved, vec![SocketAddr::from(([127, 0, 0, 1], 8080))]);
    }

    #[tokio::test]
    async fn test_target_addr_resolve_localhost() {
        let addr = TargetAddr::domain("localhost", 9000);
        let resolved = addr.resolve_all().await.unwrap();
        assert!(!resolved.is_empty());
        assert!(resolved.iter().all(|a| a.ip().is_loopback() && a.port() == 9000));
    }

    #[test]
    fn test_target_addr_default() {
        assert_eq!(format!("{}", TargetAddr::default()), "0.0.0.0:0");
    }
}
