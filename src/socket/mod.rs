//! The Noise-encrypted frame socket.
//!
//! After the handshake the stream splits into a writer (owned behind the
//! session's write mutex) and a reader (owned by the single reader task).
//! Every payload is AES-256-GCM sealed under the direction's key with a
//! monotonically increasing counter nonce; counter exhaustion terminates
//! the session instead of reusing a nonce.

mod handshake;

pub use handshake::{do_handshake, HandshakeIo, NoiseLink, WA_HEADER};

use crate::binary::{marshal, unmarshal, Node};
use crate::crypto::{Cipher, CipherError};
use crate::error::{Error, Result};
use crate::transport::{encode_frame, FrameBuffer, TransportRx, TransportTx};

fn seal_error(e: CipherError) -> Error {
    match e {
        CipherError::NonceExhausted => Error::Transport("frame counter exhausted".into()),
        other => Error::Transport(format!("frame cipher: {}", other)),
    }
}

/// Write half: encrypt, frame, send as one buffer.
pub struct NoiseWriter {
    tx: TransportTx,
    cipher: Cipher,
}

impl NoiseWriter {
    pub fn new(tx: TransportTx, cipher: Cipher) -> Self {
        Self { tx, cipher }
    }

    pub async fn send_payload(&mut self, plaintext: &[u8]) -> Result<()> {
        let ciphertext = self.cipher.encrypt(plaintext, &[]).map_err(seal_error)?;
        let frame = encode_frame(&ciphertext).map_err(|e| Error::Protocol(e.to_string()))?;
        self.tx.send(frame).await
    }

    pub async fn send_node(&mut self, node: &Node) -> Result<()> {
        self.send_payload(&marshal(node)).await
    }

    pub async fn close(&mut self) {
        self.tx.close().await;
    }
}

/// Read half: buffer, deframe, decrypt.
pub struct NoiseReader {
    rx: TransportRx,
    frames: FrameBuffer,
    cipher: Cipher,
}

impl NoiseReader {
    pub fn new(rx: TransportRx, frames: FrameBuffer, cipher: Cipher) -> Self {
        Self { rx, frames, cipher }
    }

    /// Next decrypted frame body, or `None` at orderly EOF. A decrypt
    /// failure here is fatal: the counters are out of step with the peer.
    pub async fn recv_payload(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.frames.next_frame() {
                let plaintext = self
                    .cipher
                    .decrypt(&frame, &[])
                    .map_err(|e| Error::Transport(format!("frame decrypt: {}", e)))?;
                return Ok(Some(plaintext));
            }
            match self.rx.recv().await? {
                Some(chunk) => self.frames.extend(&chunk),
                None => return Ok(None),
            }
        }
    }

    /// Next decoded node. Decode failures are per-frame protocol errors;
    /// the caller drops the frame and keeps reading.
    pub async fn recv_node(&mut self) -> Result<Option<Node>> {
        match self.recv_payload().await? {
            Some(payload) => unmarshal(&payload)
                .map(Some)
                .map_err(|e| Error::Protocol(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Node;
    use crate::transport::memory_pair;

    #[tokio::test]
    async fn test_writer_reader_share_counters() {
        let key = [0x5a; 32];
        let ((ctx, _crx), (_stx, srx)) = memory_pair();
        let mut writer = NoiseWriter::new(ctx, Cipher::new(key));
        let mut reader = NoiseReader::new(srx, FrameBuffer::new(), Cipher::new(key));

        let ping = Node::new("iq").attr("type", "get").attr("id", "aa01");
        writer.send_node(&ping).await.unwrap();
        writer.send_node(&ping).await.unwrap();

        assert_eq!(reader.recv_node().await.unwrap().unwrap(), ping);
        assert_eq!(reader.recv_node().await.unwrap().unwrap(), ping);
    }

    #[tokio::test]
    async fn test_out_of_step_counter_is_fatal() {
        let key = [0x5a; 32];
        let ((ctx, _crx), (_stx, srx)) = memory_pair();
        let mut writer = NoiseWriter::new(ctx, Cipher::new(key));
        let mut read_cipher = Cipher::new(key);
        // Burn one nonce so the reader is out of step.
        read_cipher.encrypt(b"", &[]).unwrap();
        let mut reader = NoiseReader::new(srx, FrameBuffer::new(), read_cipher);

        writer.send_payload(b"payload").await.unwrap();
        assert!(reader.recv_payload().await.is_err());
    }
}
