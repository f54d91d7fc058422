//! Command definitions
//!
//! Represents requests from clients.

/// Opcodes as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x01,
    Put = 0x02,
    Delete = 0x03,
    Range = 0x04,
    Slice = 0x05,
    MGet = 0x06,
    Batch = 0x07,
    Ping = 0x08,

    // Administrative opcodes, executed by the dispatcher against the registry
    DbCreate = 0x10,
    DbDrop = 0x11,
    DbMount = 0x12,
    DbUnmount = 0x13,
    DbList = 0x14,
}

impl Opcode {
    /// Parse an opcode byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x01 => Opcode::Get,
            0x02 => Opcode::Put,
            0x03 => Opcode::Delete,
            0x04 => Opcode::Range,
            0x05 => Opcode::Slice,
            0x06 => Opcode::MGet,
            0x07 => Opcode::Batch,
            0x08 => Opcode::Ping,
            0x10 => Opcode::DbCreate,
            0x11 => Opcode::DbDrop,
            0x12 => Opcode::DbMount,
            0x13 => Opcode::DbUnmount,
            0x14 => Opcode::DbList,
            _ => return None,
        };
        Some(opcode)
    }

    /// Whether the opcode targets the registry rather than a database actor
    pub fn is_admin(self) -> bool {
        (self as u8) >= 0x10
    }
}

/// Tag bytes for the operations inside a BATCH
pub const BATCH_PUT: u8 = 0x01;
pub const BATCH_DELETE: u8 = 0x02;

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Pairs in `[start, end)`; an empty `end` means no upper bound
    Range { start: Vec<u8>, end: Vec<u8> },

    /// Up to `limit` pairs starting at `start`
    Slice { start: Vec<u8>, limit: u32 },

    /// Values for several keys at once
    MGet { keys: Vec<Vec<u8>> },

    /// Apply all writes atomically
    Batch { ops: Vec<BatchOp> },

    /// Ping (health check)
    Ping,

    /// Create the target database
    DbCreate,

    /// Drop the target database (must be unmounted)
    DbDrop,

    /// Mount the target database
    DbMount,

    /// Unmount the target database
    DbUnmount,

    /// List all databases
    DbList,
}

impl Command {
    /// Get the opcode
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Get { .. } => Opcode::Get,
            Command::Put { .. } => Opcode::Put,
            Command::Delete { .. } => Opcode::Delete,
            Command::Range { .. } => Opcode::Range,
            Command::Slice { .. } => Opcode::Slice,
            Command::MGet { .. } => Opcode::MGet,
            Command::Batch { .. } => Opcode::Batch,
            Command::Ping => Opcode::Ping,
            Command::DbCreate => Opcode::DbCreate,
            Command::DbDrop => Opcode::DbDrop,
            Command::DbMount => Opcode::DbMount,
            Command::DbUnmount => Opcode::DbUnmount,
            Command::DbList => Opcode::DbList,
        }
    }
}

/// A decoded request payload: the target database plus the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Name of the database the command runs against
    pub database: String,

    /// The command itself
    pub command: Command,
}

impl Request {
    pub fn new(database: impl Into<String>, command: Command) -> Self {
        Self {
            database: database.into(),
            command,
        }
    }
}
