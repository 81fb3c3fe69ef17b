//! Bidirectional relay
//!
//! Pumps bytes between the frontend's client connection and the tunnel.
//! Each direction half-closes its destination when its source reaches EOF;
//! the other direction then keeps going for as long as it moves data, and
//! is dropped once it has been idle for `linger`. An error in either
//! direction tears the whole session down.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

/// Size of each direction's copy buffer
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes sent from the client to the destination
    pub client_to_tunnel: u64,
    /// Bytes sent from the destination to the client
    pub tunnel_to_client: u64,
}

/// Last time either direction moved data
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Activity {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Relay data bidirectionally between the client and the tunnel
///
/// Returns once both directions have ended. Fails if either direction
/// fails, or if the surviving direction stays idle for `linger` after the
/// first one ended.
pub async fn relay<A, B>(client: A, tunnel: B, linger: Duration) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut tunnel_read, mut tunnel_write) = tokio::io::split(tunnel);
    let activity = Activity::new();

    let upstream = pump(
        &mut client_read,
        &mut tunnel_write,
        "client -> tunnel",
        &activity,
    );
    let downstream = pump(
        &mut tunnel_read,
        &mut client_write,
        "tunnel -> client",
        &activity,
    );
    tokio::pin!(upstream);
    tokio::pin!(downstream);

    // Returning early drops the other direction
    tokio::select! {
        result = &mut upstream => {
            let client_to_tunnel = result?;
            let tunnel_to_client = linger_on(downstream, &activity, linger).await?;
            Ok(RelayStats { client_to_tunnel, tunnel_to_client })
        }
        result = &mut downstream => {
            let tunnel_to_client = result?;
            let client_to_tunnel = linger_on(upstream, &activity, linger).await?;
            Ok(RelayStats { client_to_tunnel, tunnel_to_client })
        }
    }
}

/// Copy until EOF, then shut the writer down
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: &'static str,
    activity: &Activity,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut bytes = 0u64;

    loop {
        let n = reader.read(&mut buf).await.map_err(|e| {
            debug!("{} read error: {}", direction, e);
            e
        })?;
        if n == 0 {
            break;
        }
        activity.touch();

        writer.write_all(&buf[..n]).await?;
        writer.flush().await.map_err(|e| {
            debug!("{} write error: {}", direction, e);
            e
        })?;
        activity.touch();
        bytes += n as u64;
    }

    debug!("{} finished: {} bytes", direction, bytes);

    // The peer may already be gone
    if let Err(e) = writer.shutdown().await {
        debug!("{} shutdown failed: {}", direction, e);
    }

    Ok(bytes)
}

/// Drive the surviving direction until it ends or idles for `linger`
async fn linger_on<F>(mut remaining: F, activity: &Activity, linger: Duration) -> io::Result<u64>
where
    F: Future<Output = io::Result<u64>> + Unpin,
{
    activity.touch();
    loop {
        tokio::select! {
            result = &mut remaining => return result,
            _ = tokio::time::sleep_until(activity.last() + linger) => {
                if activity.last() + linger <= Instant::now() {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "half-closed session idle for longer than its linger time",
                    ));
                }
            }
        }
    }
}
