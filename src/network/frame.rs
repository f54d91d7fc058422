//! Multipart framing
//!
//! Messages on the TCP stream are groups of frames, the way an
//! identity-routing socket sees them:
//!
//! ```text
//! ┌───────────────┬──────────┬─────────┬──────────┬─────────┬─────┐
//! │ FrameCount(2) │ Len (4)  │ Frame 1 │ Len (4)  │ Frame 2 │ ... │
//! └───────────────┴──────────┴─────────┴──────────┴─────────┴─────┘
//! ```
//!
//! The last frame is the payload; the ones before it are the routing
//! envelope and are echoed in front of the reply.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes};

use crate::error::{ElevatorError, Result};
use crate::protocol::MAX_PAYLOAD_SIZE;

/// One message: routing frames followed by the payload frame
pub type Multipart = Vec<Bytes>;

/// Maximum frames in one message
pub const MAX_FRAMES: usize = 16;

/// Maximum size of a single frame
pub const MAX_FRAME_SIZE: u32 = MAX_PAYLOAD_SIZE;

/// Read one multipart message
///
/// Blocks until a complete message is received or an error occurs
pub fn read_multipart<R: Read>(reader: &mut R) -> Result<Multipart> {
    let mut count_buf = [0u8; 2];
    reader.read_exact(&mut count_buf)?;
    let count = u16::from_be_bytes(count_buf) as usize;

    if count == 0 || count > MAX_FRAMES {
        return Err(ElevatorError::Protocol(format!(
            "invalid frame count {} (expected 1-{})",
            count, MAX_FRAMES
        )));
    }

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf);

        if len > MAX_FRAME_SIZE {
            return Err(ElevatorError::Protocol(format!(
                "frame too large: {} bytes (max {})",
                len, MAX_FRAME_SIZE
            )));
        }

        let mut frame = vec![0u8; len as usize];
        if len > 0 {
            reader.read_exact(&mut frame)?;
        }
        frames.push(Bytes::from(frame));
    }

    Ok(frames)
}

/// Write one multipart message and flush
pub fn write_multipart<W: Write>(writer: &mut W, frames: &[Bytes]) -> Result<()> {
    if frames.is_empty() || frames.len() > MAX_FRAMES {
        return Err(ElevatorError::Protocol(format!(
            "invalid frame count {} (expected 1-{})",
            frames.len(),
            MAX_FRAMES
        )));
    }

    let total: usize = frames.iter().map(|f| 4 + f.len()).sum();
    let mut message = Vec::with_capacity(2 + total);
    message.put_u16(frames.len() as u16);
    for frame in frames {
        message.put_u32(frame.len() as u32);
        message.put_slice(frame);
    }

    writer.write_all(&message)?;
    writer.flush()?;
    Ok(())
}
