//! Protocol Module
//!
//! Defines the payloads exchanged between clients and the server. Transport
//! framing (multipart messages, identity frames) lives in `network::frame`;
//! this module only sees the final payload frame.
//!
//! ## Request Format
//! ```text
//! ┌──────────────┬──────────┬────────────┬─────────────────────────────┐
//! │ NameLen (4)  │  Name    │ Opcode (1) │        Arguments            │
//! └──────────────┴──────────┴────────────┴─────────────────────────────┘
//! ```
//!
//! ### Opcodes
//! - 0x01: GET       0x05: SLICE     0x10: DBCREATE   0x13: DBUNMOUNT
//! - 0x02: PUT       0x06: MGET      0x11: DBDROP     0x14: DBLIST
//! - 0x03: DELETE    0x07: BATCH     0x12: DBMOUNT
//! - 0x04: RANGE     0x08: PING
//!
//! ## Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK    (payload = value)
//! - 0x01: ERROR (payload = error kind (1) + message)

mod command;
mod response;
mod codec;
mod identity;

pub use command::{BatchOp, Command, Opcode, Request};
pub use response::{ErrorKind, Response, Status};
pub use codec::{
    decode_request, decode_response, encode_request, encode_response, MAX_PAYLOAD_SIZE,
    MAX_RESPONSE_PAYLOAD,
};
pub use identity::Identity;
