//! Protocol codec
//!
//! Encoding and decoding functions for request and response payloads.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! ┌──────────────┬──────────┬────────────┬─────────────────────────────┐
//! │ NameLen (4)  │  Name    │ Opcode (1) │        Arguments            │
//! └──────────────┴──────────┴────────────┴─────────────────────────────┘
//! ```
//!
//! ### Arguments by Opcode (field = len (4) + bytes)
//! - GET, DELETE: key field
//! - PUT:         key field + value field
//! - RANGE:       start field + end field
//! - SLICE:       start field + limit (4)
//! - MGET:        count (4) + key field × count
//! - BATCH:       count (4) + (tag (1) + key field [+ value field]) × count
//! - PING, DB*:   empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use bytes::{Buf, BufMut};

use crate::error::{ElevatorError, Result};
use super::command::{BATCH_DELETE, BATCH_PUT};
use super::response::{put_field, take_field};
use super::{BatchOp, Command, Opcode, Request, Response, Status};

/// Response header size: 1 byte status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Largest response payload whose encoded response still fits in one frame
pub const MAX_RESPONSE_PAYLOAD: usize = MAX_PAYLOAD_SIZE as usize - HEADER_SIZE;

/// Maximum element count for MGET and BATCH
pub const MAX_ELEMENTS: u32 = 64 * 1024;

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request payload
pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + request.database.len() + 1);
    put_field(&mut message, request.database.as_bytes());
    message.put_u8(request.command.opcode() as u8);

    match &request.command {
        Command::Get { key } | Command::Delete { key } => put_field(&mut message, key),
        Command::Put { key, value } => {
            put_field(&mut message, key);
            put_field(&mut message, value);
        }
        Command::Range { start, end } => {
            put_field(&mut message, start);
            put_field(&mut message, end);
        }
        Command::Slice { start, limit } => {
            put_field(&mut message, start);
            message.put_u32(*limit);
        }
        Command::MGet { keys } => {
            message.put_u32(keys.len() as u32);
            for key in keys {
                put_field(&mut message, key);
            }
        }
        Command::Batch { ops } => {
            message.put_u32(ops.len() as u32);
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        message.put_u8(BATCH_PUT);
                        put_field(&mut message, key);
                        put_field(&mut message, value);
                    }
                    BatchOp::Delete { key } => {
                        message.put_u8(BATCH_DELETE);
                        put_field(&mut message, key);
                    }
                }
            }
        }
        Command::Ping
        | Command::DbCreate
        | Command::DbDrop
        | Command::DbMount
        | Command::DbUnmount
        | Command::DbList => {}
    }

    message
}

/// Decode a request payload
///
/// Fails with `MalformedRequest` on truncation or trailing bytes and with
/// `UnknownOpcode` on an unassigned opcode byte.
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    if bytes.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(ElevatorError::MalformedRequest(format!(
            "Payload too large: {} bytes (max {})",
            bytes.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut buf = bytes;
    let name = take_field(&mut buf)?;
    let database = String::from_utf8(name).map_err(|_| {
        ElevatorError::MalformedRequest("database name is not valid UTF-8".to_string())
    })?;

    if !buf.has_remaining() {
        return Err(ElevatorError::MalformedRequest("missing opcode".to_string()));
    }
    let opcode_byte = buf.get_u8();
    let opcode = Opcode::from_byte(opcode_byte).ok_or(ElevatorError::UnknownOpcode(opcode_byte))?;

    let command = match opcode {
        Opcode::Get => Command::Get {
            key: take_field(&mut buf)?,
        },
        Opcode::Put => Command::Put {
            key: take_field(&mut buf)?,
            value: take_field(&mut buf)?,
        },
        Opcode::Delete => Command::Delete {
            key: take_field(&mut buf)?,
        },
        Opcode::Range => Command::Range {
            start: take_field(&mut buf)?,
            end: take_field(&mut buf)?,
        },
        Opcode::Slice => Command::Slice {
            start: take_field(&mut buf)?,
            limit: take_u32(&mut buf, "SLICE limit")?,
        },
        Opcode::MGet => {
            let count = take_count(&mut buf, "MGET")?;
            let mut keys = Vec::with_capacity(count);
            for _ in 0..count {
                keys.push(take_field(&mut buf)?);
            }
            Command::MGet { keys }
        }
        Opcode::Batch => {
            let count = take_count(&mut buf, "BATCH")?;
            let mut ops = Vec::with_capacity(count);
            for _ in 0..count {
                ops.push(decode_batch_op(&mut buf)?);
            }
            Command::Batch { ops }
        }
        Opcode::Ping => Command::Ping,
        Opcode::DbCreate => Command::DbCreate,
        Opcode::DbDrop => Command::DbDrop,
        Opcode::DbMount => Command::DbMount,
        Opcode::DbUnmount => Command::DbUnmount,
        Opcode::DbList => Command::DbList,
    };

    if buf.has_remaining() {
        return Err(ElevatorError::MalformedRequest(format!(
            "{:?}: {} unexpected trailing bytes",
            opcode,
            buf.remaining()
        )));
    }

    Ok(Request { database, command })
}

/// Decode one tagged BATCH operation
fn decode_batch_op(buf: &mut &[u8]) -> Result<BatchOp> {
    if !buf.has_remaining() {
        return Err(ElevatorError::MalformedRequest(
            "BATCH: missing operation tag".to_string(),
        ));
    }
    match buf.get_u8() {
        BATCH_PUT => Ok(BatchOp::Put {
            key: take_field(buf)?,
            value: take_field(buf)?,
        }),
        BATCH_DELETE => Ok(BatchOp::Delete {
            key: take_field(buf)?,
        }),
        tag => Err(ElevatorError::MalformedRequest(format!(
            "BATCH: unknown operation tag 0x{:02x}",
            tag
        ))),
    }
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(ElevatorError::MalformedRequest(format!("{}: truncated", what)));
    }
    Ok(buf.get_u32())
}

fn take_count(buf: &mut &[u8], what: &str) -> Result<usize> {
    let count = take_u32(buf, what)?;
    if count > MAX_ELEMENTS {
        return Err(ElevatorError::MalformedRequest(format!(
            "{}: too many elements ({} > {})",
            what, count, MAX_ELEMENTS
        )));
    }
    Ok(count as usize)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_SIZE + response.payload.len());
    message.put_u8(response.status as u8);
    put_field(&mut message, &response.payload);
    message
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    if bytes.len() < HEADER_SIZE {
        return Err(ElevatorError::MalformedRequest(format!(
            "Incomplete response header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut buf = bytes;
    let status = match buf.get_u8() {
        0x00 => Status::Ok,
        0x01 => Status::Error,
        other => {
            return Err(ElevatorError::MalformedRequest(format!(
                "Unknown response status: 0x{:02x}",
                other
            )))
        }
    };

    let payload = take_field(&mut buf)?;
    if buf.has_remaining() {
        return Err(ElevatorError::MalformedRequest(format!(
            "Response: {} unexpected trailing bytes",
            buf.remaining()
        )));
    }

    Ok(Response { status, payload })
}
