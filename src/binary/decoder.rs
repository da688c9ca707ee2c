//! Binary decoder for node trees.
//!
//! Decodes any legal encoder output back to an identical tree, and is
//! tolerant of the wider scalar forms a live peer emits (tokens or packed
//! strings in content position). An unknown leading opcode is a protocol
//! error, not a skip.

use super::node::{AttrValue, Attrs, Node, NodeContent};
use super::token::{double_token, tags, token};
use crate::types::Jid;

/// Decode failures. The offending frame is dropped; the session continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of data")]
    UnexpectedEof,
    #[error("unknown token {0}")]
    UnknownToken(u8),
    #[error("unknown dictionary token ({0}, {1})")]
    UnknownDoubleToken(u8, u8),
    #[error("unexpected opcode 0x{0:02x}")]
    UnexpectedOpcode(u8),
    #[error("invalid packed character {0}")]
    InvalidPackedChar(u8),
    #[error("invalid utf-8 in string")]
    InvalidUtf8,
    #[error("{0} leftover bytes after node")]
    LeftoverBytes(usize),
    #[error("malformed node: {0}")]
    MalformedNode(String),
}

pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    /// Decode one node occupying the entire input.
    pub fn decode(data: &[u8]) -> Result<Node, DecodeError> {
        if data.len() == 1 && data[0] == tags::STREAM_END {
            return Ok(Node::new("xmlstreamend"));
        }
        let mut decoder = Decoder::new(data);
        let node = decoder.read_node()?;
        let leftover = decoder.data.len() - decoder.index;
        if leftover != 0 {
            return Err(DecodeError::LeftoverBytes(leftover));
        }
        Ok(node)
    }

    fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self.data.get(self.index).ok_or(DecodeError::UnexpectedEof)?;
        self.index += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.index + n > self.data.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = &self.data[self.index..self.index + n];
        self.index += n;
        Ok(bytes)
    }

    fn read_int(&mut self, bytes: usize) -> Result<usize, DecodeError> {
        let mut result = 0usize;
        for _ in 0..bytes {
            result = (result << 8) | self.read_byte()? as usize;
        }
        Ok(result)
    }

    fn read_node(&mut self) -> Result<Node, DecodeError> {
        let opcode = self.read_byte()?;
        let size = self.read_list_size(opcode)?;
        if size == 0 {
            return Err(DecodeError::MalformedNode("empty list for node".into()));
        }

        let tag_opcode = self.read_byte()?;
        let tag = self.read_string(tag_opcode)?;

        let mut attrs = Attrs::new();
        for _ in 0..(size - 1) / 2 {
            let key_opcode = self.read_byte()?;
            let key = self.read_string(key_opcode)?;
            let value = self.read_attr_value()?;
            attrs.insert(key, value);
        }

        let content = if (size - 1) % 2 == 1 {
            self.read_content()?
        } else {
            NodeContent::None
        };

        Ok(Node { tag, attrs, content })
    }

    fn read_list_size(&mut self, opcode: u8) -> Result<usize, DecodeError> {
        match opcode {
            tags::LIST_EMPTY => Ok(0),
            tags::LIST_8 => Ok(self.read_byte()? as usize),
            tags::LIST_16 => self.read_int(2),
            other => Err(DecodeError::UnexpectedOpcode(other)),
        }
    }

    fn read_content(&mut self) -> Result<NodeContent, DecodeError> {
        let opcode = self.read_byte()?;
        match opcode {
            tags::LIST_EMPTY | tags::LIST_8 | tags::LIST_16 => {
                let len = self.read_list_size(opcode)?;
                let mut children = Vec::with_capacity(len);
                for _ in 0..len {
                    children.push(self.read_node()?);
                }
                Ok(NodeContent::Children(children))
            }
            tags::BINARY_8 | tags::BINARY_20 | tags::BINARY_32 => {
                Ok(NodeContent::Bytes(self.read_binary(opcode)?.to_vec()))
            }
            // A peer may emit string-form content; normalize to bytes.
            other => Ok(NodeContent::Bytes(self.read_string(other)?.into_bytes())),
        }
    }

    fn read_binary(&mut self, opcode: u8) -> Result<&'a [u8], DecodeError> {
        let len = match opcode {
            tags::BINARY_8 => self.read_byte()? as usize,
            tags::BINARY_20 => {
                let len = self.read_int(3)?;
                len & 0x000F_FFFF
            }
            tags::BINARY_32 => self.read_int(4)?,
            other => return Err(DecodeError::UnexpectedOpcode(other)),
        };
        self.read_bytes(len)
    }

    fn read_string(&mut self, opcode: u8) -> Result<String, DecodeError> {
        match opcode {
            tags::LIST_EMPTY => Ok(String::new()),
            tags::BINARY_8 | tags::BINARY_20 | tags::BINARY_32 => {
                let bytes = self.read_binary(opcode)?;
                String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
            }
            tags::NIBBLE_8 => self.read_packed(unpack_nibble),
            tags::HEX_8 => self.read_packed(unpack_hex),
            tags::DICTIONARY_0..=tags::DICTIONARY_3 => {
                let dict = opcode - tags::DICTIONARY_0;
                let index = self.read_byte()?;
                double_token(dict, index)
                    .map(str::to_string)
                    .ok_or(DecodeError::UnknownDoubleToken(dict, index))
            }
            opcode if (opcode as usize) < super::token::SINGLE_BYTE_TOKENS.len() => token(opcode)
                .map(str::to_string)
                .ok_or(DecodeError::UnknownToken(opcode)),
            other => Err(DecodeError::UnexpectedOpcode(other)),
        }
    }

    fn read_packed(&mut self, value_of: fn(u8) -> Result<char, DecodeError>) -> Result<String, DecodeError> {
        let header = self.read_byte()?;
        let odd = header & 0x80 != 0;
        let count = (header & 0x7F) as usize;
        let bytes = self.read_bytes(count)?;

        let mut out = String::with_capacity(count * 2);
        for (i, b) in bytes.iter().enumerate() {
            out.push(value_of(b >> 4)?);
            let lo = b & 0x0F;
            if i + 1 == bytes.len() && odd {
                break;
            }
            out.push(value_of(lo)?);
        }
        Ok(out)
    }

    fn read_attr_value(&mut self) -> Result<AttrValue, DecodeError> {
        let opcode = self.read_byte()?;
        match opcode {
            tags::LIST_EMPTY => Ok(AttrValue::None),
            tags::JID_PAIR => Ok(AttrValue::Jid(self.read_jid_pair()?)),
            tags::COMPANION_JID => Ok(AttrValue::Jid(self.read_companion_jid()?)),
            other => Ok(AttrValue::String(self.read_string(other)?)),
        }
    }

    fn read_jid_pair(&mut self) -> Result<Jid, DecodeError> {
        let user_opcode = self.read_byte()?;
        let user = self.read_string(user_opcode)?;
        let server_opcode = self.read_byte()?;
        let server = self.read_string(server_opcode)?;
        Ok(Jid::new(user, server))
    }

    fn read_companion_jid(&mut self) -> Result<Jid, DecodeError> {
        let agent = self.read_byte()?;
        let device = self.read_byte()?;
        let user_opcode = self.read_byte()?;
        let user = self.read_string(user_opcode)?;
        Ok(Jid::device(user, agent, device as u16))
    }
}

fn unpack_nibble(v: u8) -> Result<char, DecodeError> {
    match v {
        0..=9 => Ok((b'0' + v) as char),
        10 => Ok('-'),
        11 => Ok('.'),
        other => Err(DecodeError::InvalidPackedChar(other)),
    }
}

fn unpack_hex(v: u8) -> Result<char, DecodeError> {
    match v {
        0..=9 => Ok((b'0' + v) as char),
        10..=15 => Ok((b'A' + v - 10) as char),
        other => Err(DecodeError::InvalidPackedChar(other)),
    }
}

/// Decode wire bytes into a node.
pub fn decode(data: &[u8]) -> Result<Node, DecodeError> {
    Decoder::decode(data)
}
