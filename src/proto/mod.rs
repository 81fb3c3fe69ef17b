//! Wire formats spoken on both sides of the chain
//!
//! - `socks5`: RFC1928 / RFC1929 frames
//! - `http`: HTTP/1.1 CONNECT and forward-proxy heads

pub mod addr;
pub mod http;
pub mod socks5;

pub use addr::TargetAddr;
