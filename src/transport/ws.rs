//! WebSocket transport profile.
//!
//! Binary RFC-6455 frames to the chat endpoint, with the fixed `Origin`
//! and `Host` headers the service requires and an optional HTTP CONNECT
//! proxy in front of the TLS stream. Idle timeouts stay disabled; the
//! keepalive ping lives inside the protocol.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{client_async_tls, connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::{endpoints, Config};
use crate::error::{Error, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the WebSocket, directly or through the configured proxy.
pub async fn connect(config: &Config) -> Result<WsStream> {
    let mut request = config
        .web_url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Transport(format!("bad endpoint url: {}", e)))?;
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static(endpoints::WEB_ORIGIN));
    request
        .headers_mut()
        .insert("Host", HeaderValue::from_static(endpoints::WEB_HOST));

    let ws = match &config.proxy {
        Some(proxy) => {
            let tunneled = proxy_connect(proxy, endpoints::WEB_HOST, 443).await?;
            let (ws, _) = client_async_tls(request, tunneled)
                .await
                .map_err(|e| Error::Transport(format!("websocket connect: {}", e)))?;
            ws
        }
        None => {
            let (ws, _) = connect_async(request)
                .await
                .map_err(|e| Error::Transport(format!("websocket connect: {}", e)))?;
            ws
        }
    };
    Ok(ws)
}

/// Establish an HTTP CONNECT tunnel through `proxy` to `host:port`.
async fn proxy_connect(proxy: &str, host: &str, port: u16) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(proxy).await?;
    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = host,
        port = port
    );
    stream.write_all(request.as_bytes()).await?;

    // Read until the end of the response headers.
    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() > 4096 {
            return Err(Error::Transport("oversized proxy response".into()));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::Transport("proxy closed during CONNECT".into()));
        }
        response.push(byte[0]);
    }

    let status = String::from_utf8_lossy(&response);
    let ok = status
        .lines()
        .next()
        .map(|line| line.contains(" 200 ") || line.ends_with(" 200"))
        .unwrap_or(false);
    if !ok {
        return Err(Error::Transport(format!(
            "proxy refused CONNECT: {}",
            status.lines().next().unwrap_or("")
        )));
    }
    Ok(stream)
}
