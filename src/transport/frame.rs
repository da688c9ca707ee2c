//! Length-prefixed frame codec.
//!
//! Every frame on the wire is `[3-byte big-endian length][payload]`. The
//! decoder consumes arbitrary chunks into a growable buffer and yields one
//! payload per complete frame; a header claiming more bytes than buffered
//! simply waits. Frames are never truncated.

/// Largest payload the 3-byte length prefix can describe.
pub const MAX_FRAME_SIZE: usize = (1 << 24) - 1;

/// Frame codec errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the 3-byte length prefix")]
    TooLarge(usize),
}

/// Incremental decoder over a growable byte buffer.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received chunk.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is fully buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < 3 {
            return None;
        }
        let len = ((self.buf[0] as usize) << 16) | ((self.buf[1] as usize) << 8) | self.buf[2] as usize;
        if self.buf.len() < 3 + len {
            return None;
        }
        let frame = self.buf[3..3 + len].to_vec();
        self.buf.drain(..3 + len);
        Some(frame)
    }

    /// Bytes currently buffered (incomplete frame remainder).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Encode one frame as a single buffer so concurrent senders never
/// interleave a header with another frame's payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let len = payload.len();
    let mut frame = Vec::with_capacity(3 + len);
    frame.push((len >> 16) as u8);
    frame.push((len >> 8) as u8);
    frame.push(len as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}
