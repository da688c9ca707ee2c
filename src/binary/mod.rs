//! Binary node codec: the tagged-tree wire format carried inside every
//! post-handshake frame.
//!
//! A decrypted frame body is `[flag][payload]`; when `flag & 0x02` is set
//! the payload is zlib-deflated node bytes, otherwise raw node bytes.

mod decoder;
mod encoder;
mod node;
pub mod token;

use std::io::Read;

pub use decoder::{decode, DecodeError, Decoder};
pub use encoder::{encode, Encoder};
pub use node::{AttrValue, Attrs, Node, NodeContent};
pub use token::tags;

/// Flag bit marking a deflate-compressed frame body.
pub const FLAG_COMPRESSED: u8 = 0x02;

/// Serialize a node into a frame body. Always emits the uncompressed form;
/// the peer accepts both.
pub fn marshal(node: &Node) -> Vec<u8> {
    let encoded = encode(node);
    let mut out = Vec::with_capacity(encoded.len() + 1);
    out.push(0);
    out.extend_from_slice(&encoded);
    out
}

/// Parse a frame body into a node, inflating when the compression flag is
/// set.
pub fn unmarshal(payload: &[u8]) -> Result<Node, DecodeError> {
    let (&flag, body) = payload.split_first().ok_or(DecodeError::UnexpectedEof)?;
    if flag & FLAG_COMPRESSED != 0 {
        let mut inflated = Vec::new();
        flate2::read::ZlibDecoder::new(body)
            .read_to_end(&mut inflated)
            .map_err(|_| DecodeError::MalformedNode("bad zlib stream".into()))?;
        decode(&inflated)
    } else {
        decode(body)
    }
}
