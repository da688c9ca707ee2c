//! Drives the Noise handshake over a fresh transport.
//!
//! The routing header `WA\x06\x03` is sent once, in front of the first
//! frame, and doubles as the Noise prologue. Each handshake message is a
//! protobuf `HandshakeMessage` envelope inside a regular length-prefixed
//! frame.

use prost::Message as ProstMessage;

use crate::config::Config;
use crate::crypto::{Cipher, NoiseHandshake};
use crate::error::{Error, Result};
use crate::proto::handshake::{
    login_payload, registration_payload, ClientFinish, ClientHello, HandshakeMessage,
};
use crate::socket::{NoiseReader, NoiseWriter};
use crate::store::Device;
use crate::transport::{encode_frame, FrameBuffer, TransportRx, TransportTx};

/// Routing header: magic, dialect, version. Mixed into the handshake hash
/// as the prologue.
pub const WA_HEADER: &[u8] = b"WA\x06\x03";

/// Plaintext framing used during the handshake, before the transport
/// ciphers exist.
pub struct HandshakeIo {
    tx: TransportTx,
    rx: TransportRx,
    frames: FrameBuffer,
    sent_intro: bool,
    intro_to_skip: usize,
}

impl HandshakeIo {
    pub fn new(tx: TransportTx, rx: TransportRx) -> Self {
        Self {
            tx,
            rx,
            frames: FrameBuffer::new(),
            sent_intro: false,
            intro_to_skip: 0,
        }
    }

    /// Responder-side view: the initiator's routing header is consumed
    /// before framing starts.
    pub fn responder(tx: TransportTx, rx: TransportRx) -> Self {
        let mut io = Self::new(tx, rx);
        io.sent_intro = true;
        io.intro_to_skip = WA_HEADER.len();
        io
    }

    /// Decompose into the transport halves and the residual frame buffer,
    /// for promotion to an encrypted socket after the handshake.
    pub fn into_parts(self) -> (TransportTx, TransportRx, FrameBuffer) {
        (self.tx, self.rx, self.frames)
    }

    /// Send one frame, prefixing the routing header on the very first one.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let framed = encode_frame(payload).map_err(|e| Error::Handshake(e.to_string()))?;
        let buf = if self.sent_intro {
            framed
        } else {
            self.sent_intro = true;
            let mut buf = Vec::with_capacity(WA_HEADER.len() + framed.len());
            buf.extend_from_slice(WA_HEADER);
            buf.extend_from_slice(&framed);
            buf
        };
        self.tx.send(buf).await
    }

    /// Receive one complete frame.
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.frames.next_frame() {
                return Ok(frame);
            }
            match self.rx.recv().await? {
                Some(chunk) => {
                    let skip = self.intro_to_skip.min(chunk.len());
                    self.intro_to_skip -= skip;
                    self.frames.extend(&chunk[skip..]);
                }
                None => return Err(Error::Handshake("peer closed during handshake".into())),
            }
        }
    }
}

/// An authenticated stream: split ciphers plus the server's static key.
pub struct NoiseLink {
    pub writer: NoiseWriter,
    pub reader: NoiseReader,
    pub remote_static: [u8; 32],
}

/// Run the full XX handshake as initiator and split into transport keys.
///
/// The user payload is a registration bundle when the device has no Jid
/// yet, and a session-resume login otherwise.
pub async fn do_handshake(
    tx: TransportTx,
    rx: TransportRx,
    device: &Device,
    config: &Config,
) -> Result<NoiseLink> {
    let deadline = config.pairing_timeout;
    match tokio::time::timeout(deadline, handshake_inner(tx, rx, device)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Handshake(format!(
            "no handshake completion within {:?}",
            deadline
        ))),
    }
}

async fn handshake_inner(tx: TransportTx, rx: TransportRx, device: &Device) -> Result<NoiseLink> {
    let mut io = HandshakeIo::new(tx, rx);
    let mut noise = NoiseHandshake::new(WA_HEADER, device.noise_key.clone());

    // -> e
    let ephemeral = noise.start();
    let hello = HandshakeMessage {
        client_hello: Some(ClientHello {
            ephemeral: Some(ephemeral.to_vec()),
        }),
        ..Default::default()
    };
    io.send_frame(&hello.encode_to_vec()).await?;

    // <- e, ee, s, es
    let frame = io.recv_frame().await?;
    let envelope = HandshakeMessage::decode(frame.as_slice())
        .map_err(|e| Error::Handshake(format!("server hello decode: {}", e)))?;
    let server_hello = envelope
        .server_hello
        .ok_or_else(|| Error::Handshake("missing server hello".into()))?;
    let server_ephemeral = server_hello
        .ephemeral
        .ok_or_else(|| Error::Handshake("server hello missing ephemeral".into()))?;
    let static_ciphertext = server_hello
        .r#static
        .ok_or_else(|| Error::Handshake("server hello missing static".into()))?;
    let payload_ciphertext = server_hello
        .payload
        .ok_or_else(|| Error::Handshake("server hello missing payload".into()))?;

    // The decrypted payload carries the certificate chain; session setup
    // does not consume it.
    let _server_payload = noise
        .read_server_hello(&server_ephemeral, &static_ciphertext, &payload_ciphertext)
        .map_err(|e| Error::Handshake(e.to_string()))?;

    // -> s, se + user payload
    let payload = build_client_payload(device);
    let (static_ciphertext, payload_ciphertext) = noise
        .write_client_finish(&payload.encode_to_vec())
        .map_err(|e| Error::Handshake(e.to_string()))?;
    let finish = HandshakeMessage {
        client_finish: Some(ClientFinish {
            r#static: Some(static_ciphertext),
            payload: Some(payload_ciphertext),
        }),
        ..Default::default()
    };
    io.send_frame(&finish.encode_to_vec()).await?;

    let remote_static = noise
        .remote_static()
        .ok_or_else(|| Error::Handshake("no remote static after exchange".into()))?;
    let (write_cipher, read_cipher): (Cipher, Cipher) =
        noise.finish().map_err(|e| Error::Handshake(e.to_string()))?;

    let HandshakeIo { tx, rx, frames, .. } = io;
    Ok(NoiseLink {
        writer: NoiseWriter::new(tx, write_cipher),
        reader: NoiseReader::new(rx, frames, read_cipher),
        remote_static,
    })
}

fn build_client_payload(device: &Device) -> crate::proto::handshake::ClientPayload {
    match &device.jid {
        Some(jid) => login_payload(jid.user.parse().unwrap_or(0), jid.device),
        None => registration_payload(
            device.registration_id,
            &device.identity_key.public,
            device.signed_prekey.key_id,
            &device.signed_prekey.key_pair.public,
            &device.signed_prekey.signature,
        ),
    }
}
