//! Transports: ordered, reliable byte pipes under the frame codec.
//!
//! Both profiles satisfy one contract: send whole frames, receive byte
//! chunks, close once. Instances are single-use; any I/O error moves the
//! transport to CLOSED and reconnecting means building a new one. The
//! in-memory pipe exists for scripted-peer tests and loopback embedders.

mod frame;
mod tcp;
mod ws;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::tungstenite::Message;

use crate::config::{ClientProfile, Config};
use crate::error::{Error, Result};

pub use frame::{encode_frame, FrameBuffer, FrameError, MAX_FRAME_SIZE};
pub use ws::WsStream;

/// Write half of a connected transport.
pub enum TransportTx {
    Ws(SplitSink<WsStream, Message>),
    Tcp(OwnedWriteHalf),
    Mem(WriteHalf<DuplexStream>),
}

/// Read half of a connected transport.
pub enum TransportRx {
    Ws(SplitStream<WsStream>),
    Tcp(OwnedReadHalf),
    Mem(ReadHalf<DuplexStream>),
}

impl TransportTx {
    /// Send one already-framed buffer as a single write.
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        match self {
            TransportTx::Ws(sink) => sink
                .send(Message::Binary(frame))
                .await
                .map_err(|e| Error::Transport(format!("websocket send: {}", e))),
            TransportTx::Tcp(half) => Ok(half.write_all(&frame).await?),
            TransportTx::Mem(half) => Ok(half.write_all(&frame).await?),
        }
    }

    /// Close the write side. Errors are ignored; the transport is done
    /// either way.
    pub async fn close(&mut self) {
        match self {
            TransportTx::Ws(sink) => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
            }
            TransportTx::Tcp(half) => {
                let _ = half.shutdown().await;
            }
            TransportTx::Mem(half) => {
                let _ = half.shutdown().await;
            }
        }
    }
}

impl TransportRx {
    /// Receive the next chunk of bytes. `Ok(None)` is orderly EOF; frame
    /// boundaries are restored by the [`FrameBuffer`] above this call.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            TransportRx::Ws(stream) => loop {
                match stream.next().await {
                    None => return Ok(None),
                    Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(Error::Transport(format!("websocket recv: {}", e))),
                }
            },
            TransportRx::Tcp(half) => recv_chunk(half).await,
            TransportRx::Mem(half) => recv_chunk(half).await,
        }
    }
}

async fn recv_chunk<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; 8192];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}

/// Connect the transport selected by the configuration profile.
pub async fn connect(config: &Config) -> Result<(TransportTx, TransportRx)> {
    match config.profile {
        ClientProfile::Web => {
            let (tx, rx) = ws::connect(config).await?.split();
            Ok((TransportTx::Ws(tx), TransportRx::Ws(rx)))
        }
        ClientProfile::Mobile => {
            let stream = tcp::connect(&config.mobile_host, config.mobile_port).await?;
            let (rx, tx) = stream.into_split();
            Ok((TransportTx::Tcp(tx), TransportRx::Tcp(rx)))
        }
    }
}

/// A connected in-memory transport pair: `(client_end, server_end)`.
pub fn memory_pair() -> ((TransportTx, TransportRx), (TransportTx, TransportRx)) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let (client_rx, client_tx) = tokio::io::split(client);
    let (server_rx, server_tx) = tokio::io::split(server);
    (
        (TransportTx::Mem(client_tx), TransportRx::Mem(client_rx)),
        (TransportTx::Mem(server_tx), TransportRx::Mem(server_rx)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_frames_survive_chunking() {
        let ((mut ctx, _crx), (_stx, mut srx)) = memory_pair();

        ctx.send(encode_frame(b"alpha").unwrap()).await.unwrap();
        ctx.send(encode_frame(b"beta").unwrap()).await.unwrap();

        let mut frames = Vec::new();
        let mut buffer = FrameBuffer::new();
        while frames.len() < 2 {
            let chunk = srx.recv().await.unwrap().expect("peer still open");
            buffer.extend(&chunk);
            while let Some(frame) = buffer.next_frame() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[tokio::test]
    async fn test_memory_pair_eof_on_close() {
        let ((mut ctx, _crx), (_stx, mut srx)) = memory_pair();
        ctx.close().await;
        assert!(srx.recv().await.unwrap().is_none());
    }
}
