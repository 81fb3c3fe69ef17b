//! Chain negotiation
//!
//! Builds a [`Tunnel`] to a destination by walking the hop list in order.
//! The TCP connection to hop 0 is the only socket opened locally; every
//! later hop is reached through the tunnel built so far.

pub mod dialer;

pub use dialer::establish_hop;

use crate::config::HopSpec;
use crate::error::{ChainError, ErrorKind, HandshakeError, Stage};
use crate::helper::Timeouts;
use crate::proto::TargetAddr;
use crate::transport::{StreamDyn, Transport, Tunnel};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::debug;

/// One request for a tunnel, built per frontend connection
#[derive(Debug, Clone)]
pub struct ChainRequest {
    /// Hops in dialing order, possibly empty
    pub hops: Arc<[HopSpec]>,
    /// Final destination
    pub destination: TargetAddr,
}

impl ChainRequest {
    /// Create a request
    pub fn new(hops: Arc<[HopSpec]>, destination: TargetAddr) -> Self {
        ChainRequest { hops, destination }
    }

    /// Request that bypasses every hop
    pub fn direct(destination: TargetAddr) -> Self {
        ChainRequest {
            hops: Arc::from(Vec::new()),
            destination,
        }
    }

    /// Target hop `index` must reach: the next hop, or the destination for the last one
    pub fn next_target(&self, index: usize) -> TargetAddr {
        match self.hops.get(index + 1) {
            Some(hop) => hop.addr(),
            None => self.destination.clone(),
        }
    }
}

/// Drives the hop dialer across a chain
#[derive(Debug)]
pub struct Negotiator<T: Transport> {
    transport: T,
    timeouts: Timeouts,
}

impl<T: Transport> Negotiator<T> {
    /// Create a negotiator opening its first leg with `transport`
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Negotiator {
            transport,
            timeouts,
        }
    }

    /// Timeouts in use
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Build a tunnel to `request.destination`.
    ///
    /// Fails at the first hop that fails. Dropping the partial tunnel on
    /// failure closes every connection opened so far.
    pub async fn build_tunnel(&self, request: &ChainRequest) -> Result<Tunnel, ChainError> {
        let first = match request.hops.first() {
            Some(hop) => hop.addr(),
            None => {
                let stream = self
                    .connect(&request.destination)
                    .await
                    .map_err(|e| ChainError::new(Stage::Direct, e))?;
                debug!("Direct connection to {}", request.destination);
                return Ok(Tunnel::new(stream, request.destination.clone(), 0));
            }
        };

        let mut stream = self
            .connect(&first)
            .await
            .map_err(|e| ChainError::new(Stage::Hop(0), e))?;

        for (index, hop) in request.hops.iter().enumerate() {
            let next = request.next_target(index);
            stream = match timeout(self.timeouts.handshake, establish_hop(stream, hop, &next)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(ChainError::new(Stage::Hop(index), e)),
                Err(_) => {
                    return Err(ChainError::new(
                        Stage::Hop(index),
                        HandshakeError::new(ErrorKind::Timeout),
                    ))
                }
            };
            debug!("Hop {} ({}) reached {}", index, hop, next);
        }

        Ok(Tunnel::new(
            stream,
            request.destination.clone(),
            request.hops.len(),
        ))
    }

    async fn connect(&self, addr: &TargetAddr) -> Result<Box<dyn StreamDyn>, HandshakeError> {
        match timeout(self.timeouts.connect, self.transport.connect(addr)).await {
            Ok(Ok(stream)) => Ok(Box::new(stream)),
            Ok(Err(e)) => Err(HandshakeError::connect(e)),
            Err(_) => Err(HandshakeError::new(ErrorKind::Timeout)),
        }
    }
}
