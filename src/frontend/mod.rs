//! Local proxy frontend
//!
//! A listener the wrapped command connects to as to any SOCKS5 or HTTP
//! proxy. Each accepted connection runs in its own task: client handshake,
//! chain negotiation, then relay. The success reply is only sent once the
//! whole chain is connected.

mod handshake;
pub mod http;
pub mod socks5;

pub use handshake::ClientHandshake;
pub use http::HttpSession;
pub use socks5::Socks5Session;

use crate::chain::{ChainRequest, Negotiator};
use crate::config::{Config, Credentials, HopSpec, IgnoreSubnet, Mode};
use crate::helper::{
    accept_backoff, duration_from_millis, duration_from_secs, DEFAULT_LINGER_SECS,
};
use crate::proto::TargetAddr;
use crate::relay::relay;
use crate::transport::Transport;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Settings shared read-only by every session
#[derive(Debug, Clone)]
pub struct FrontendSettings {
    /// Address to listen on
    pub listen: SocketAddr,
    /// Hops in chain order
    pub hops: Arc<[HopSpec]>,
    /// Chain or pass-through
    pub mode: Mode,
    /// Destinations dialed directly
    pub ignore_subnets: Vec<IgnoreSubnet>,
    /// Credentials clients must present
    pub credentials: Option<Credentials>,
    /// Bound on the client handshake
    pub handshake_timeout: Duration,
    /// Time a half-closed session may stay idle
    pub linger: Duration,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
}

impl FrontendSettings {
    /// Create settings from the configuration
    pub fn from_config(config: &Config) -> Self {
        FrontendSettings {
            listen: config.listen,
            hops: config.proxies.clone().into(),
            mode: config.mode,
            ignore_subnets: config.ignore_subnets.clone(),
            credentials: config.listen_credentials(),
            handshake_timeout: duration_from_millis(config.tcp_read_timeout),
            linger: duration_from_secs(DEFAULT_LINGER_SECS),
            max_sessions: config.max_sessions,
        }
    }

    /// Chain request for `destination`, empty when it bypasses the chain
    pub fn route(&self, destination: TargetAddr) -> ChainRequest {
        let bypass = self.mode == Mode::Direct
            || self
                .ignore_subnets
                .iter()
                .any(|entry| entry.matches(&destination));

        if bypass {
            ChainRequest::direct(destination)
        } else {
            ChainRequest::new(self.hops.clone(), destination)
        }
    }
}

/// Lifecycle of the accept task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopped,
    Aborted,
}

/// Local proxy frontend, not yet listening
#[derive(Debug)]
pub struct Frontend<T: Transport> {
    settings: Arc<FrontendSettings>,
    negotiator: Arc<Negotiator<T>>,
}

impl<T: Transport> Frontend<T> {
    /// Create a frontend building its tunnels with `negotiator`
    pub fn new(settings: FrontendSettings, negotiator: Negotiator<T>) -> Self {
        Frontend {
            settings: Arc::new(settings),
            negotiator: Arc::new(negotiator),
        }
    }

    /// Bind the listener and start accepting
    pub async fn start(self) -> io::Result<FrontendHandle> {
        let listener = TcpListener::bind(self.settings.listen).await?;
        let local_addr = listener.local_addr()?;
        info!("Frontend listening on {}", local_addr);

        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        let active = Arc::new(AtomicUsize::new(0));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.settings,
            self.negotiator,
            phase_rx,
            active.clone(),
        ));

        Ok(FrontendHandle {
            local_addr,
            active,
            phase_tx,
            accept_task,
        })
    }
}

/// Handle on a running frontend
///
/// Dropping the handle aborts every session.
#[derive(Debug)]
pub struct FrontendHandle {
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
    phase_tx: watch::Sender<Phase>,
    accept_task: JoinHandle<()>,
}

impl FrontendHandle {
    /// Address clients connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of sessions currently open
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting; sessions already open are left alone
    pub fn stop(&self) {
        self.phase_tx.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Stop, wait up to `grace` for open sessions, then abort the rest.
    ///
    /// Returns the number of sessions that had to be aborted.
    pub async fn drain(mut self, grace: Duration) -> usize {
        self.stop();

        if tokio::time::timeout(grace, &mut self.accept_task)
            .await
            .is_ok()
        {
            debug!("All sessions finished");
            return 0;
        }

        let remaining = self.active_sessions();
        warn!(
            "Aborting {} session(s) still open after {:?}",
            remaining, grace
        );
        self.phase_tx.send_replace(Phase::Aborted);
        if let Err(e) = (&mut self.accept_task).await {
            debug!("Accept task ended abnormally: {}", e);
        }
        remaining
    }
}

/// Keeps the active-session count in step with session tasks, aborted or not
struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        SessionGuard(active)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn accept_loop<T: Transport>(
    listener: TcpListener,
    settings: Arc<FrontendSettings>,
    negotiator: Arc<Negotiator<T>>,
    mut phase_rx: watch::Receiver<Phase>,
    active: Arc<AtomicUsize>,
) {
    let mut sessions = JoinSet::new();
    let mut accept_failures = 0u32;

    loop {
        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() || *phase_rx.borrow() != Phase::Running {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => {
                        accept_failures = 0;
                        conn
                    }
                    Err(e) => {
                        // Typically out of descriptors; retrying at once would spin
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_backoff(accept_failures);
                        warn!("Failed to accept connection: {}. Retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                if active.load(Ordering::SeqCst) >= settings.max_sessions {
                    warn!(
                        "Rejecting {}: {} sessions already open",
                        peer, settings.max_sessions
                    );
                    continue;
                }

                let guard = SessionGuard::new(active.clone());
                sessions.spawn(serve_session(
                    stream,
                    peer,
                    settings.clone(),
                    negotiator.clone(),
                    guard,
                ));
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    drop(listener);
    debug!("Frontend stopped accepting");

    // Let open sessions run to completion unless told to abort
    loop {
        if *phase_rx.borrow() == Phase::Aborted {
            break;
        }
        tokio::select! {
            finished = sessions.join_next() => {
                if finished.is_none() {
                    return;
                }
            }
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    sessions.abort_all();
    while sessions.join_next().await.is_some() {}
}

async fn serve_session<T: Transport>(
    mut stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<FrontendSettings>,
    negotiator: Arc<Negotiator<T>>,
    _guard: SessionGuard,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    // Step 1: Client handshake
    let accept = ClientHandshake::accept(&mut stream, settings.credentials.as_ref());
    let handshake = match tokio::time::timeout(settings.handshake_timeout, accept).await {
        Ok(Ok(handshake)) => handshake,
        Ok(Err(e)) => {
            debug!("Client handshake from {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("Client handshake from {} timed out", peer);
            return;
        }
    };

    // Step 2: Chain
    let request = settings.route(handshake.target().clone());
    debug!(
        "{} {} request from {} to {}",
        handshake,
        if request.hops.is_empty() { "direct" } else { "chained" },
        peer,
        request.destination
    );

    let mut tunnel = match negotiator.build_tunnel(&request).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            warn!(
                "Session {} -> {} failed: {}: {}",
                peer,
                request.destination,
                e,
                e.kind()
            );
            if let Err(e) = handshake.send_failure(&mut stream, &e).await {
                debug!("Failed to send failure reply to {}: {}", peer, e);
            }
            return;
        }
    };

    // Step 3: Success reply, then relay
    if let Err(e) = handshake.send_success(&mut stream, &mut tunnel).await {
        debug!("Failed to complete handshake with {}: {}", peer, e);
        return;
    }

    info!(
        "Session {} -> {} established through {} hop(s)",
        peer,
        tunnel.target(),
        tunnel.hops()
    );

    match relay(stream, tunnel, settings.linger).await {
        Ok(stats) => debug!(
            "Session {} -> {} closed: {} bytes up, {} bytes down",
            peer, request.destination, stats.client_to_tunnel, stats.tunnel_to_client
        ),
        Err(e) => debug!(
            "Session {} -> {} ended with error: {}",
            peer, request.destination, e
        ),
    }
}
