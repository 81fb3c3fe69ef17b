//! Helper utilities for Proxyc
//!
//! Defaults shared by the configuration, the frontend and the wrapper.

use std::time::Duration;

/// Default TCP connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 8000;

/// Default handshake read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 15000;

/// Default grace period for open sessions once the child exited, in milliseconds
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2000;

/// Default time a half-closed session may stay idle, in seconds
pub const DEFAULT_LINGER_SECS: u64 = 30;

/// Default maximum number of concurrent frontend sessions
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Default frontend listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Delay before retrying a failed accept
pub const ACCEPT_BACKOFF_INITIAL_MS: u64 = 10;

/// Upper bound on the accept retry delay
pub const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Delay before accepting again after `failures` consecutive accept errors.
///
/// Doubles from [`ACCEPT_BACKOFF_INITIAL_MS`] up to [`ACCEPT_BACKOFF_MAX_MS`].
pub fn accept_backoff(failures: u32) -> Duration {
    let factor = 2u64.saturating_pow(failures.saturating_sub(1));
    duration_from_millis(
        ACCEPT_BACKOFF_INITIAL_MS
            .saturating_mul(factor)
            .min(ACCEPT_BACKOFF_MAX_MS),
    )
}

/// Parse duration from milliseconds
pub fn duration_from_millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Timeouts applied while building a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on each TCP connect
    pub connect: Duration,
    /// Bound on each protocol handshake
    pub handshake: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: duration_from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            handshake: duration_from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

impl Timeouts {
    /// Build timeouts from millisecond values
    pub fn from_millis(connect_ms: u64, handshake_ms: u64) -> Self {
        Timeouts {
            connect: duration_from_millis(connect_ms),
            handshake: duration_from_millis(handshake_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_MS, 8000);
        assert_eq!(DEFAULT_READ_TIMEOUT_MS, 15000);
        assert_eq!(DEFAULT_LISTEN_ADDR, "127.0.0.1:0");
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(8));
        assert_eq!(timeouts.handshake, Duration::from_secs(15));
    }

    #[test]
    fn test_timeouts_from_millis() {
        let timeouts = Timeouts::from_millis(250, 500);
        assert_eq!(timeouts.connect, Duration::from_millis(250));
        assert_eq!(timeouts.handshake, Duration::from_millis(500));
    }

    #[test]
    fn test_accept_backoff() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(200), Duration::from_secs(1));
    }

    #[test]
    fn test_duration_helpers() {
        assert_eq!(duration_from_millis(1500), Duration::from_millis(1500));
        assert_eq!(duration_from_secs(0), Duration::from_secs(0));
        assert_eq!(duration_from_secs(60), Duration::from_secs(60));
    }
}
