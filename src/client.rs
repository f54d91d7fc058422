//! Blocking client
//!
//! Speaks the multipart transport: every request goes out as
//! `[request id][payload]`, and the server echoes the request id frame on the
//! reply. Replies for different databases may come back in any order, so
//! `call` parks replies for other ids until they are asked for.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};

use bytes::Bytes;

use crate::error::{ElevatorError, Result};
use crate::network::{read_multipart, write_multipart};
use crate::protocol::{
    decode_response, encode_request, BatchOp, Command, ErrorKind, Request, Response,
};

/// A connection to an Elevator server
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    next_id: u64,
    parked: HashMap<u64, Response>,
}

impl Client {
    /// Connect to `addr` (`host:port`, an optional `tcp://` prefix is ignored)
    pub fn connect(addr: &str) -> Result<Self> {
        let addr = addr.strip_prefix("tcp://").unwrap_or(addr);
        let target = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ElevatorError::Network(format!("cannot resolve {}", addr)))?;

        let stream = TcpStream::connect(target)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            next_id: 0,
            parked: HashMap::new(),
        })
    }

    /// Send a request without waiting; returns its request id
    pub fn send(&mut self, request: &Request) -> Result<u64> {
        self.send_raw(Bytes::from(encode_request(request)))
    }

    /// Send an arbitrary payload frame; returns its request id
    pub fn send_raw(&mut self, payload: Bytes) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        let frames = vec![Bytes::copy_from_slice(&id.to_be_bytes()), payload];
        write_multipart(&mut self.writer, &frames)?;
        Ok(id)
    }

    /// Receive the next reply, whichever request it answers
    pub fn recv(&mut self) -> Result<(u64, Response)> {
        let mut frames = read_multipart(&mut self.reader)?;
        let payload = frames
            .pop()
            .ok_or_else(|| ElevatorError::Protocol("empty reply".to_string()))?;
        let response = decode_response(&payload)?;

        // A reply without an id answers a message the server could not frame
        let id = match frames.first() {
            Some(frame) => {
                let bytes: [u8; 8] = frame.as_ref().try_into().map_err(|_| {
                    ElevatorError::Protocol("reply carries a foreign identity".to_string())
                })?;
                u64::from_be_bytes(bytes)
            }
            None => return Err(remote_error(&response)),
        };
        Ok((id, response))
    }

    /// Wait for the reply to request `id`
    pub fn wait(&mut self, id: u64) -> Result<Response> {
        if let Some(response) = self.parked.remove(&id) {
            return Ok(response);
        }
        loop {
            let (got, response) = self.recv()?;
            if got == id {
                return Ok(response);
            }
            self.parked.insert(got, response);
        }
    }

    /// Send a request and wait for its reply
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        let id = self.send(request)?;
        self.wait(id)
    }

    /// Run `command` against `database`, turning error replies into errors
    pub fn execute(&mut self, database: &str, command: Command) -> Result<Response> {
        let response = self.call(&Request::new(database, command))?;
        if response.is_ok() {
            Ok(response)
        } else {
            Err(remote_error(&response))
        }
    }

    // -------------------------------------------------------------------------
    // Data commands
    // -------------------------------------------------------------------------

    /// Fetch a value; `None` if the key is absent
    pub fn get(&mut self, database: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let command = Command::Get { key: key.to_vec() };
        match self.execute(database, command) {
            Ok(response) => Ok(Some(response.payload)),
            Err(e) if e.kind() == ErrorKind::KeyNotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn put(&mut self, database: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let command = Command::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.execute(database, command).map(|_| ())
    }

    pub fn delete(&mut self, database: &str, key: &[u8]) -> Result<()> {
        self.execute(database, Command::Delete { key: key.to_vec() })
            .map(|_| ())
    }

    /// Pairs with `start <= key < end`; an empty `end` means no upper bound
    pub fn range(
        &mut self,
        database: &str,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let command = Command::Range {
            start: start.to_vec(),
            end: end.to_vec(),
        };
        self.execute(database, command)?.read_pairs()
    }

    /// Up to `limit` pairs starting at `start`
    pub fn slice(
        &mut self,
        database: &str,
        start: &[u8],
        limit: u32,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let command = Command::Slice {
            start: start.to_vec(),
            limit,
        };
        self.execute(database, command)?.read_pairs()
    }

    pub fn mget(&mut self, database: &str, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let command = Command::MGet {
            keys: keys.iter().map(|k| k.to_vec()).collect(),
        };
        self.execute(database, command)?.read_optional_fields()
    }

    pub fn batch(&mut self, database: &str, ops: Vec<BatchOp>) -> Result<()> {
        self.execute(database, Command::Batch { ops }).map(|_| ())
    }

    pub fn ping(&mut self, database: &str) -> Result<Vec<u8>> {
        Ok(self.execute(database, Command::Ping)?.payload)
    }

    // -------------------------------------------------------------------------
    // Administrative commands
    // -------------------------------------------------------------------------

    pub fn create_database(&mut self, name: &str) -> Result<()> {
        self.execute(name, Command::DbCreate).map(|_| ())
    }

    pub fn drop_database(&mut self, name: &str) -> Result<()> {
        self.execute(name, Command::DbDrop).map(|_| ())
    }

    pub fn mount(&mut self, name: &str) -> Result<()> {
        self.execute(name, Command::DbMount).map(|_| ())
    }

    pub fn unmount(&mut self, name: &str) -> Result<()> {
        self.execute(name, Command::DbUnmount).map(|_| ())
    }

    /// `(name, status)` for every database, sorted by name
    pub fn list_databases(&mut self) -> Result<Vec<(String, String)>> {
        let pairs = self.execute("", Command::DbList)?.read_pairs()?;
        Ok(pairs
            .into_iter()
            .map(|(name, status)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&status).into_owned(),
                )
            })
            .collect())
    }
}

fn remote_error(response: &Response) -> ElevatorError {
    ElevatorError::Remote {
        kind: response.error_kind().unwrap_or(ErrorKind::Internal),
        message: response.error_message().unwrap_or_default(),
    }
}
