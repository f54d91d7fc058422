//! Response definitions
//!
//! Represents responses to clients.

use bytes::{Buf, BufMut};

use crate::error::{ElevatorError, Result};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Error = 0x01,
}

/// Error kinds carried in the first payload byte of an ERROR response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    MalformedRequest = 0x01,
    UnknownOpcode = 0x02,
    DatabaseNotFound = 0x03,
    DatabaseExists = 0x04,
    AlreadyMounted = 0x05,
    AlreadyUnmounted = 0x06,
    DatabaseMounted = 0x07,
    KeyNotFound = 0x08,
    InvalidDatabaseName = 0x09,
    Storage = 0x0A,
    Catalogue = 0x0B,
    DatabaseUnmounted = 0x0C,
    Internal = 0xFF,
}

impl ErrorKind {
    /// Parse an error kind byte; unknown bytes read as `Internal`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => ErrorKind::MalformedRequest,
            0x02 => ErrorKind::UnknownOpcode,
            0x03 => ErrorKind::DatabaseNotFound,
            0x04 => ErrorKind::DatabaseExists,
            0x05 => ErrorKind::AlreadyMounted,
            0x06 => ErrorKind::AlreadyUnmounted,
            0x07 => ErrorKind::DatabaseMounted,
            0x08 => ErrorKind::KeyNotFound,
            0x09 => ErrorKind::InvalidDatabaseName,
            0x0A => ErrorKind::Storage,
            0x0B => ErrorKind::Catalogue,
            0x0C => ErrorKind::DatabaseUnmounted,
            _ => ErrorKind::Internal,
        }
    }
}

/// A response to send to a client
///
/// For OK responses `payload` is the value (possibly a sequence of
/// length-prefixed fields for multi-valued commands). For ERROR responses it
/// is the error kind byte followed by a UTF-8 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Raw payload
    pub payload: Vec<u8>,
}

impl Response {
    /// Create an OK response carrying a single value
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create an OK response without payload
    pub fn empty() -> Self {
        Self::ok(Vec::new())
    }

    /// Create an OK response carrying a sequence of length-prefixed fields
    pub fn fields<I, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut payload = Vec::new();
        for field in fields {
            put_field(&mut payload, field.as_ref());
        }
        Self::ok(payload)
    }

    /// Create an OK response carrying key/value pairs (key field, value field)
    pub fn pairs(pairs: &[(Vec<u8>, Vec<u8>)]) -> Self {
        Self::fields(pairs.iter().flat_map(|(k, v)| [k.as_slice(), v.as_slice()]))
    }

    /// Create an OK response carrying optional values (presence byte + field)
    pub fn optional_fields(values: &[Option<Vec<u8>>]) -> Self {
        let mut payload = Vec::new();
        for value in values {
            match value {
                Some(v) => {
                    payload.put_u8(1);
                    put_field(&mut payload, v);
                }
                None => payload.put_u8(0),
            }
        }
        Self::ok(payload)
    }

    /// Create an ERROR response
    pub fn error(kind: ErrorKind, message: &str) -> Self {
        let mut payload = Vec::with_capacity(1 + message.len());
        payload.put_u8(kind as u8);
        payload.put_slice(message.as_bytes());
        Self {
            status: Status::Error,
            payload,
        }
    }

    /// Check for an OK status
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Error kind of an ERROR response
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            Status::Error => self.payload.first().map(|b| ErrorKind::from_byte(*b)),
            Status::Ok => None,
        }
    }

    /// Error message of an ERROR response
    pub fn error_message(&self) -> Option<String> {
        match self.status {
            Status::Error => {
                let message = self.payload.get(1..).unwrap_or(&[]);
                Some(String::from_utf8_lossy(message).into_owned())
            }
            Status::Ok => None,
        }
    }

    /// Split the payload of a multi-valued response into fields
    pub fn read_fields(&self) -> Result<Vec<Vec<u8>>> {
        let mut buf = self.payload.as_slice();
        let mut fields = Vec::new();
        while buf.has_remaining() {
            fields.push(take_field(&mut buf)?);
        }
        Ok(fields)
    }

    /// Split the payload of a RANGE/SLICE response into pairs
    pub fn read_pairs(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let fields = self.read_fields()?;
        if fields.len() % 2 != 0 {
            return Err(ElevatorError::MalformedRequest(
                "pair payload has an odd number of fields".to_string(),
            ));
        }
        let mut iter = fields.into_iter();
        let mut pairs = Vec::new();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            pairs.push((k, v));
        }
        Ok(pairs)
    }

    /// Split the payload of an MGET response into optional values
    pub fn read_optional_fields(&self) -> Result<Vec<Option<Vec<u8>>>> {
        let mut buf = self.payload.as_slice();
        let mut values = Vec::new();
        while buf.has_remaining() {
            match buf.get_u8() {
                0 => values.push(None),
                1 => values.push(Some(take_field(&mut buf)?)),
                tag => {
                    return Err(ElevatorError::MalformedRequest(format!(
                        "unknown presence tag 0x{:02x}",
                        tag
                    )))
                }
            }
        }
        Ok(values)
    }
}

impl From<&ElevatorError> for Response {
    fn from(err: &ElevatorError) -> Self {
        Response::error(err.kind(), &err.to_string())
    }
}

/// Append a length-prefixed field
///
/// Fields never exceed `MAX_PAYLOAD_SIZE`: requests are decoded under that
/// limit and the engine refuses to build larger replies.
pub(crate) fn put_field(buf: &mut Vec<u8>, field: &[u8]) {
    debug_assert!(field.len() <= u32::MAX as usize, "field length overflows u32");
    buf.put_u32(field.len() as u32);
    buf.put_slice(field);
}

/// Consume a length-prefixed field
pub(crate) fn take_field(buf: &mut &[u8]) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(ElevatorError::MalformedRequest("missing field length".to_string()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ElevatorError::MalformedRequest(format!(
            "incomplete field (expected {}, got {})",
            len,
            buf.remaining()
        )));
    }
    let field = buf[..len].to_vec();
    buf.advance(len);
    Ok(field)
}
