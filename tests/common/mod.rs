//! Test utilities and mocks for Proxyc
//!
//! Mock SOCKS5 and HTTP CONNECT hops speaking their protocol byte by byte,
//! without the crate's own codec, plus destinations and frontend helpers.

#![allow(dead_code)]

use proxyc::chain::Negotiator;
use proxyc::config::{Config, HopSpec, Mode};
use proxyc::frontend::{Frontend, FrontendHandle, FrontendSettings};
use proxyc::helper::Timeouts;
use proxyc::transport::TcpTransport;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A port nothing listens on
pub async fn closed_port() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr
}

/// Count of accepted connections
pub type Counter = Arc<AtomicUsize>;

/// Read a counter
pub fn count(counter: &Counter) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Destination that writes `OK` and closes
pub async fn spawn_ok_destination() -> (SocketAddr, Counter) {
    let (listener, addr) = create_test_listener().await;
    let accepted = Counter::default();
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = stream.write_all(b"OK").await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, accepted)
}

/// Destination echoing everything it receives
pub async fn spawn_echo_destination() -> (SocketAddr, Counter) {
    let (listener, addr) = create_test_listener().await;
    let accepted = Counter::default();
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    (addr, accepted)
}

/// Request heads seen by an origin
pub type Requests = Arc<std::sync::Mutex<Vec<String>>>;

/// HTTP origin answering `OK` to each request and keeping the connection
/// open unless the request asked for `Connection: close`
pub async fn spawn_http_origin() -> (SocketAddr, Requests) {
    let (listener, addr) = create_test_listener().await;
    let requests = Requests::default();
    let seen = requests.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                loop {
                    let mut head = String::new();
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        head.push_str(&line);
                        if line == "\r\n" {
                            break;
                        }
                    }

                    let close = head.to_ascii_lowercase().contains("connection: close");
                    seen.lock().unwrap().push(head);
                    let response: &[u8] = if close {
                        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK"
                    } else {
                        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK"
                    };
                    if reader.get_mut().write_all(response).await.is_err() || close {
                        let _ = reader.get_mut().shutdown().await;
                        return;
                    }
                }
            });
        }
    });

    (addr, requests)
}

/// Mock SOCKS5 hop, requiring `credentials` when given
pub async fn spawn_socks5_hop(credentials: Option<(&'static str, &'static str)>) -> SocketAddr {
    let (listener, addr) = create_test_listener().await;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_socks5(stream, credentials));
        }
    });

    addr
}

async fn serve_socks5(mut client: TcpStream, credentials: Option<(&'static str, &'static str)>) {
    let mut header = [0u8; 2];
    if client.read_exact(&mut header).await.is_err() || header[0] != 5 {
        return;
    }
    let mut methods = vec![0u8; header[1] as usize];
    if client.read_exact(&mut methods).await.is_err() {
        return;
    }

    let wanted = if credentials.is_some() { 2 } else { 0 };
    if !methods.contains(&wanted) {
        let _ = client.write_all(&[5, 0xFF]).await;
        return;
    }
    client.write_all(&[5, wanted]).await.unwrap();

    if let Some((username, password)) = credentials {
        let mut version_len = [0u8; 2];
        client.read_exact(&mut version_len).await.unwrap();
        let mut user = vec![0u8; version_len[1] as usize];
        client.read_exact(&mut user).await.unwrap();
        let mut pass_len = [0u8; 1];
        client.read_exact(&mut pass_len).await.unwrap();
        let mut pass = vec![0u8; pass_len[0] as usize];
        client.read_exact(&mut pass).await.unwrap();

        if user != username.as_bytes() || pass != password.as_bytes() {
            let _ = client.write_all(&[1, 1]).await;
            return;
        }
        client.write_all(&[1, 0]).await.unwrap();
    }

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await.unwrap();
    let target = match request[3] {
        1 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await.unwrap();
            let port = client.read_u16().await.unwrap();
            format!("{}:{}", Ipv4Addr::from(ip), port)
        }
        3 => {
            let len = client.read_u8().await.unwrap();
            let mut name = vec![0u8; len as usize];
            client.read_exact(&mut name).await.unwrap();
            let port = client.read_u16().await.unwrap();
            format!("{}:{}", String::from_utf8(name).unwrap(), port)
        }
        4 => {
            let mut ip = [0u8; 16];
            client.read_exact(&mut ip).await.unwrap();
            let port = client.read_u16().await.unwrap();
            format!("[{}]:{}", Ipv6Addr::from(ip), port)
        }
        _ => return,
    };

    let mut upstream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(_) => {
            let _ = client.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await;
            return;
        }
    };
    client
        .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0])
        .await
        .unwrap();

    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
}

/// Mock HTTP CONNECT hop, requiring Basic `credentials` (base64 of `user:pass`) when given
pub async fn spawn_http_hop(basic_token: Option<&'static str>) -> SocketAddr {
    let (listener, addr) = create_test_listener().await;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_http(stream, basic_token));
        }
    });

    addr
}

async fn serve_http(client: TcpStream, basic_token: Option<&'static str>) {
    let mut reader = BufReader::new(client);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let (method, authority) = match (parts.next(), parts.next()) {
        (Some(method), Some(authority)) => (method.to_string(), authority.to_string()),
        _ => return,
    };

    let mut authorized = basic_token.is_none();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let (Some(token), Some((name, value))) = (basic_token, line.split_once(':')) {
            if name.eq_ignore_ascii_case("proxy-authorization")
                && value.trim() == format!("Basic {}", token)
            {
                authorized = true;
            }
        }
    }

    if method != "CONNECT" {
        let _ = reader
            .get_mut()
            .write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n")
            .await;
        return;
    }
    if !authorized {
        let _ = reader
            .get_mut()
            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
            .await;
        return;
    }

    let mut upstream = match TcpStream::connect(authority.as_str()).await {
        Ok(stream) => stream,
        Err(_) => {
            let _ = reader
                .get_mut()
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
                .await;
            return;
        }
    };

    let buffered = reader.buffer().to_vec();
    let mut client = reader.into_inner();
    client
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await
        .unwrap();
    if !buffered.is_empty() {
        upstream.write_all(&buffered).await.unwrap();
    }

    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
}

/// Parse hop URLs
pub fn hops(urls: &[String]) -> Vec<HopSpec> {
    urls.iter().map(|url| url.parse().unwrap()).collect()
}

/// Short timeouts for tests
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_secs(2),
        handshake: Duration::from_secs(2),
    }
}

/// Negotiator dialing over real TCP
pub fn negotiator() -> Negotiator<TcpTransport> {
    Negotiator::new(TcpTransport::with_defaults(), test_timeouts())
}

/// Start a frontend routing through `proxies`, directly when empty
pub async fn start_frontend(proxies: Vec<HopSpec>) -> FrontendHandle {
    let mode = if proxies.is_empty() {
        Mode::Direct
    } else {
        Mode::Chain
    };
    let config = Config {
        proxies,
        mode,
        ..Default::default()
    };
    start_frontend_with(FrontendSettings::from_config(&config)).await
}

/// Start a frontend with explicit settings
pub async fn start_frontend_with(settings: FrontendSettings) -> FrontendHandle {
    Frontend::new(settings, negotiator()).start().await.unwrap()
}

/// Wait until `condition` holds, for at most two seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
