//! HTTP server side of the frontend
//!
//! Serves CONNECT requests and absolute-form requests of clients that use
//! the frontend as a plain forward proxy.

use crate::config::Credentials;
use crate::error::{ErrorKind, HandshakeError};
use crate::proto::http::{self, RequestHead};
use crate::proto::TargetAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Realm announced to clients that must authenticate
pub const PROXY_REALM: &str = "proxyc";

/// HTTP client whose request head has been read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSession {
    target: TargetAddr,
    /// Rewritten request head to send through the tunnel, forward requests only
    forward: Option<Vec<u8>>,
}

impl HttpSession {
    /// Requested destination
    pub fn target(&self) -> &TargetAddr {
        &self.target
    }

    /// Whether this is a plain forward request rather than a CONNECT
    pub fn is_forward(&self) -> bool {
        self.forward.is_some()
    }

    /// Read and check the request head; `first` is the byte used for detection.
    ///
    /// Unusable requests are answered with `400` and missing or wrong
    /// credentials with `407` before the error is returned.
    pub async fn accept<S>(
        stream: &mut S,
        first: u8,
        credentials: Option<&Credentials>,
    ) -> Result<Self, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let head = http::read_head(stream, &[first]).await?;
        let request = match http::parse_request_head(&head) {
            Ok(request) => request,
            Err(e) => {
                send_status(stream, 400, "Bad Request", &[]).await?;
                return Err(e.into());
            }
        };
        debug!("HTTP client sent {} {}", request.method, request.target);

        if let Some(expected) = credentials {
            check_credentials(stream, &request, expected).await?;
        }

        let parsed = if request.is_connect() {
            http::parse_authority(&request.target).map(|target| (target, None))
        } else {
            http::parse_absolute_uri(&request.target)
                .map(|(target, path)| (target, Some(request.to_origin_form(&path))))
        };

        match parsed {
            Ok((target, forward)) => Ok(HttpSession { target, forward }),
            Err(e) => {
                send_status(stream, 400, "Bad Request", &[]).await?;
                Err(e.into())
            }
        }
    }

    /// Complete the handshake once the tunnel is up.
    ///
    /// CONNECT clients get `200 Connection established`; for forward
    /// requests the rewritten head goes to the destination instead.
    pub async fn send_success<S, T>(&self, client: &mut S, tunnel: &mut T) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
        T: AsyncWrite + Unpin,
    {
        match &self.forward {
            Some(head) => {
                tunnel.write_all(head).await?;
                tunnel.flush().await
            }
            None => send_status(client, 200, "Connection established", &[]).await,
        }
    }

    /// Tell the client the chain could not be built
    pub async fn send_failure<S>(&self, client: &mut S, kind: ErrorKind) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let (status, reason) = failure_status(kind);
        send_status(client, status, reason, &[]).await
    }
}

/// Status line for a chain failure
pub fn failure_status(kind: ErrorKind) -> (u16, &'static str) {
    match kind {
        ErrorKind::Timeout => (504, "Gateway Timeout"),
        _ => (502, "Bad Gateway"),
    }
}

async fn check_credentials<S>(
    stream: &mut S,
    request: &RequestHead,
    expected: &Credentials,
) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    let header = request.header("Proxy-Authorization");
    let offered = header.and_then(http::parse_basic_auth);
    if offered.as_ref() == Some(expected) {
        return Ok(());
    }

    let challenge = format!("Basic realm=\"{}\"", PROXY_REALM);
    send_status(
        stream,
        407,
        "Proxy Authentication Required",
        &[("Proxy-Authenticate", challenge.as_str())],
    )
    .await?;

    let kind = if header.is_some() {
        ErrorKind::AuthFailed
    } else {
        ErrorKind::AuthRequired
    };
    Err(HandshakeError::new(kind))
}

async fn send_status<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    headers: &[(&str, &str)],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&http::encode_response(status, reason, headers))
        .await?;
    stream.flush().await
}
