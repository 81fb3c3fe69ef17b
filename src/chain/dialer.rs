//! Hop dialer
//!
//! Client side of one hop: given a stream that already reaches the hop,
//! perform its handshake so that the same stream reaches the next target.

use crate::config::{Credentials, HopSpec, Scheme};
use crate::error::{ErrorKind, HandshakeError, HopFailure};
use crate::proto::{http, socks5, TargetAddr};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Negotiate a tunnel to `next` through `hop`.
///
/// One handshake exchange, no retries. On success the returned stream is
/// byte-transparent to `next`.
pub async fn establish_hop<S>(
    mut stream: S,
    hop: &HopSpec,
    next: &TargetAddr,
) -> Result<S, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    debug!("Negotiating {} -> {}", hop, next);

    match hop.scheme {
        Scheme::Socks5 => socks5_connect(&mut stream, hop.credentials.as_ref(), next).await?,
        Scheme::Http => http_connect(&mut stream, hop.credentials.as_ref(), next).await?,
    }

    Ok(stream)
}

async fn socks5_connect<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    next: &TargetAddr,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Step 1: Greeting
    let methods = socks5::greeting_methods(credentials.is_some());
    stream.write_all(&socks5::encode_greeting(&methods)).await?;
    stream.flush().await?;

    // Step 2: Method selection
    let method = socks5::read_method_selection(stream).await?;
    debug!("SOCKS5 hop selected method {:#04x}", method);

    match method {
        socks5::SOCKS5_AUTH_METHOD_NONE => {}
        socks5::SOCKS5_AUTH_METHOD_PASSWORD => {
            let credentials =
                credentials.ok_or_else(|| HandshakeError::new(ErrorKind::AuthRequired))?;
            password_auth(stream, credentials).await?;
        }
        socks5::SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => {
            let kind = if credentials.is_some() {
                ErrorKind::AuthFailed
            } else {
                ErrorKind::AuthRequired
            };
            return Err(HandshakeError::new(kind));
        }
        _ => return Err(HandshakeError::new(ErrorKind::ProtocolViolation)),
    }

    // Step 3: Connect request
    let request = socks5::encode_request(socks5::SOCKS5_CMD_TCP_CONNECT, next)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    // Step 4: Reply
    let reply = socks5::read_reply(stream).await?;
    match HopFailure::from_reply(reply.code) {
        None => {
            debug!("SOCKS5 hop connected, bound {}", reply.bound);
            Ok(())
        }
        Some(failure) => Err(HandshakeError::new(ErrorKind::Hop(failure))),
    }
}

async fn password_auth<S>(stream: &mut S, credentials: &Credentials) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = socks5::encode_auth_request(credentials)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    match socks5::read_auth_status(stream).await? {
        socks5::SOCKS5_AUTH_SUCCESS => Ok(()),
        _ => Err(HandshakeError::new(ErrorKind::AuthFailed)),
    }
}

async fn http_connect<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    next: &TargetAddr,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = http::encode_connect_request(next, credentials);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let head = http::read_head(stream, &[]).await?;
    let response = http::parse_response_head(&head)?;
    debug!(
        "HTTP hop answered {} {}",
        response.status, response.reason
    );

    if response.is_success() {
        return Ok(());
    }

    let kind = match response.status {
        407 if credentials.is_some() => ErrorKind::AuthFailed,
        407 => ErrorKind::AuthRequired,
        status => ErrorKind::Hop(HopFailure::from_http_status(status)),
    };
    Err(HandshakeError::new(kind))
}
