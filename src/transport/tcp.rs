//! Raw-socket transport profile: plain TCP with kernel keepalive, carrying
//! the same 3-byte length-prefixed frames as the WebSocket profile.

use tokio::net::TcpStream;

use crate::error::Result;

/// Connect the mobile-profile TCP socket.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    socket2::SockRef::from(&stream).set_keepalive(true)?;
    Ok(stream)
}
