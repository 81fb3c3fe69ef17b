//! SOCKS5 server side of the frontend
//!
//! Authentication negotiation, optional RFC1929 username/password check and
//! CONNECT request parsing. Only CONNECT is served.

use crate::config::Credentials;
use crate::error::{CodecError, ErrorKind, HandshakeError};
use crate::proto::socks5::*;
use crate::proto::TargetAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Authentication method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    None,
    /// Username/password authentication
    Password,
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::None => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Password => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }
}

/// Select the method to use: password when the frontend demands it, else no auth
fn select_auth_method(methods: &[u8], auth_required: bool) -> Option<AuthMethod> {
    let wanted = if auth_required {
        AuthMethod::Password
    } else {
        AuthMethod::None
    };
    methods.contains(&wanted.to_byte()).then_some(wanted)
}

/// SOCKS5 client whose CONNECT request has been read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Session {
    target: TargetAddr,
}

impl Socks5Session {
    /// Requested destination
    pub fn target(&self) -> &TargetAddr {
        &self.target
    }

    /// Run the server side of the handshake; the version byte was already read.
    ///
    /// Rejections the protocol can express (no acceptable method, failed
    /// authentication, unsupported command or address type) are answered
    /// before the error is returned.
    pub async fn accept<S>(
        stream: &mut S,
        credentials: Option<&Credentials>,
    ) -> Result<Self, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Step 1: Method negotiation
        let methods = read_greeting_methods(stream).await?;
        let selected = select_auth_method(&methods, credentials.is_some());
        let selected_byte = selected
            .map(AuthMethod::to_byte)
            .unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE);
        stream
            .write_all(&encode_method_selection(selected_byte))
            .await?;
        stream.flush().await?;

        let method = selected.ok_or_else(|| HandshakeError::new(ErrorKind::AuthRequired))?;
        debug!("SOCKS5 client authenticating with {:?}", method);

        // Step 2: Username/password
        if let (AuthMethod::Password, Some(expected)) = (method, credentials) {
            let offered = read_auth_request(stream).await?;
            let status = if &offered == expected {
                SOCKS5_AUTH_SUCCESS
            } else {
                SOCKS5_AUTH_FAILURE
            };
            stream.write_all(&encode_auth_status(status)).await?;
            stream.flush().await?;

            if status != SOCKS5_AUTH_SUCCESS {
                return Err(HandshakeError::new(ErrorKind::AuthFailed));
            }
        }

        // Step 3: Request
        let request = match read_request(stream).await {
            Ok(request) => request,
            Err(CodecError::AddressTypeNotSupported(atyp)) => {
                send_reply(stream, SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                return Err(CodecError::AddressTypeNotSupported(atyp).into());
            }
            Err(e) => return Err(e.into()),
        };

        if request.command != SOCKS5_CMD_TCP_CONNECT {
            send_reply(stream, SOCKS5_REPLY_COMMAND_NOT_SUPPORTED).await?;
            return Err(CodecError::CommandNotSupported(request.command).into());
        }

        Ok(Socks5Session {
            target: request.target,
        })
    }

    /// Tell the client its tunnel is up
    pub async fn send_success<S>(&self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        send_reply(stream, SOCKS5_REPLY_SUCCEEDED).await
    }

    /// Tell the client the chain could not be built
    pub async fn send_failure<S>(&self, stream: &mut S, kind: ErrorKind) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        send_reply(stream, failure_reply_code(kind)).await
    }
}

/// Best matching reply code for a chain failure
pub fn failure_reply_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Hop(failure) => failure.reply_code(),
        ErrorKind::AuthRequired | ErrorKind::AuthFailed => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
        ErrorKind::Timeout => SOCKS5_REPLY_HOST_UNREACHABLE,
        ErrorKind::ProtocolViolation | ErrorKind::TransportClosed => SOCKS5_REPLY_GENERAL_FAILURE,
    }
}

/// Send a reply with the placeholder bound address `0.0.0.0:0`
async fn send_reply<S>(stream: &mut S, code: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = encode_reply(code, &TargetAddr::default())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&reply).await?;
    stream.flush().await
}
