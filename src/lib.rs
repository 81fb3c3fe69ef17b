//! # Proxyc - Proxy Chaining for Any Command
//!
//! Proxyc runs a command with its outbound TCP connections routed through an
//! ordered chain of SOCKS5 and HTTP CONNECT proxies, and exits with the
//! command's exit status.
//!
//! ## Features
//!
//! - **Mixed Chains**: SOCKS5 (no auth or username/password) and HTTP CONNECT
//!   (optionally with Basic auth) hops in any order
//! - **Local Frontend**: SOCKS5 and HTTP proxy on loopback, protocol detected
//!   per connection, exported to the command through `*_proxy` variables
//! - **Structured Failures**: every failure names the hop that failed and is
//!   answered with the client protocol's own failure code
//! - **Bypass**: pass-through mode and ignored subnets dial destinations directly
//!
//! ## Usage
//!
//! ```rust,ignore
//! use proxyc::config::load_config;
//! use proxyc::wrapper::run_wrapped;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("proxyc.toml")?;
//!     let code = run_wrapped(&config, &["curl".into(), "http://example.com".into()]).await?;
//!     std::process::exit(code)
//! }
//! ```
//!
//! ## Architecture
//!
//! The frontend learns the destination from the command's proxy handshake,
//! the negotiator walks the hops in order (each hop's tunnel carrying the
//! next handshake) and the relay pumps bytes once the last hop is through.
//!
//! ```text
//! Command -> Frontend -> Hop 0 -> Hop 1 -> ... -> Destination
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chain;
pub mod config;
pub mod error;
pub mod frontend;
pub mod helper;
pub mod proto;
pub mod relay;
pub mod transport;
pub mod wrapper;

// Re-export commonly used items
pub use chain::{ChainRequest, Negotiator};
pub use config::{load_config, Config, HopSpec};
pub use error::{ChainError, ErrorKind, HandshakeError, HopFailure};
pub use frontend::{Frontend, FrontendHandle, FrontendSettings};
pub use transport::{TcpTransport, Transport, Tunnel};
pub use wrapper::run_wrapped;

/// Version of the Proxyc library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "proxyc");
    }
}
