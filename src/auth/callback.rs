//! One-shot local listener for the OAuth2 redirect
//!
//! Binds the host/port of the configured redirect URI, accepts a single
//! connection, hands back its request target (`/path?code=..&state=..`)
//! and stops listening.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};

const MAX_REQUEST_HEAD: usize = 8192;
const ACK_BODY: &str = "Ok. You may close this window and return to the terminal.";

/// Listens on every address family the redirect host resolves to, so a
/// browser that picks `::1` for `localhost` still reaches us.
pub struct CallbackListener {
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

impl CallbackListener {
    /// Bind to the host and port named by `redirect_uri`.
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("redirect URI has no host: {redirect_uri}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let mut port = url.port_or_known_default().unwrap_or(80);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await?
            .collect();
        let v4 = addrs.iter().find(|a| a.is_ipv4()).copied();
        let v6 = addrs.iter().find(|a| a.is_ipv6()).copied();

        let mut bind_errors: Vec<String> = Vec::new();
        let mut listener_v4 = None;
        let mut listener_v6 = None;

        for (addr, slot) in [(v4, &mut listener_v4), (v6, &mut listener_v6)] {
            let Some(mut addr) = addr else { continue };
            // An ephemeral port picked by the first bind is reused by the second
            addr.set_port(port);
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local = listener.local_addr()?;
                    port = local.port();
                    tracing::debug!("Listening for authorization callback on {}", local);
                    *slot = Some(listener);
                }
                Err(err) => bind_errors.push(format!("{addr} ({err})")),
            }
        }

        if listener_v4.is_none() && listener_v6.is_none() {
            let detail = if bind_errors.is_empty() {
                format!("{host} did not resolve to any address")
            } else {
                bind_errors.join("; ")
            };
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("cannot bind callback listener: {detail}"),
            )));
        }
        if !bind_errors.is_empty() {
            tracing::debug!("Partial callback bind: {}", bind_errors.join("; "));
        }

        Ok(Self {
            listener_v4,
            listener_v6,
        })
    }

    pub fn port(&self) -> Result<u16> {
        let listener = self
            .listener_v4
            .as_ref()
            .or(self.listener_v6.as_ref())
            .ok_or_else(|| Error::Config("callback listener is not bound".into()))?;
        Ok(listener.local_addr()?.port())
    }

    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        match (self.listener_v4.as_ref(), self.listener_v6.as_ref()) {
            (Some(v4), Some(v6)) => {
                tokio::select! {
                    accepted = v4.accept() => accepted,
                    accepted = v6.accept() => accepted,
                }
            }
            (Some(listener), None) | (None, Some(listener)) => listener.accept().await,
            (None, None) => std::future::pending().await,
        }
    }

    /// Wait for exactly one redirect and return its request target.
    ///
    /// Consumes the listener, so nothing is accepted after the first
    /// connection. `timeout` and `cancel` cover both the accept and the
    /// read of the request head.
    pub async fn wait(self, timeout: Duration, cancel: &CancellationToken) -> Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;

        let received = async move {
            let (mut socket, peer) = self.accept().await?;
            drop(self);
            tracing::debug!("Authorization callback connection from {}", peer);
            let head = read_request_head(&mut socket).await?;
            Ok::<_, Error>((socket, head))
        };

        let (mut socket, head) = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::CallbackCancelled),
            received = tokio::time::timeout_at(deadline, received) => {
                received.map_err(|_| Error::CallbackTimeout(timeout))??
            }
        };

        let target = request_target(&head);
        let (status, body) = match target {
            Ok(_) => ("200 OK", ACK_BODY),
            Err(_) => ("400 Bad Request", "Bad request"),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;

        target
    }
}

async fn read_request_head(socket: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Pull the target out of a `GET <target> HTTP/1.1` request line.
fn request_target(head: &str) -> Result<String> {
    let line = head.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) if !target.is_empty() => Ok(target.to_string()),
        _ => Err(Error::Authorization(format!(
            "unexpected callback request: {:?}",
            line
        ))),
    }
}
