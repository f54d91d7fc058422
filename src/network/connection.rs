//! Connection Handler
//!
//! Handles individual client connections. Each connection gets a reader
//! (decode + dispatch, in transport order) and a writer (drains the replies
//! the router queues for this peer).

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender};

use crate::error::{ElevatorError, Result};
use crate::protocol::{encode_response, Response};

use super::dispatcher::Dispatcher;
use super::frame::{read_multipart, write_multipart, Multipart};
use super::router::Router;

/// Reader side of a client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// Peer id assigned by the router
    id: u64,

    /// Identity frame prepended to every inbound message
    peer: Bytes,

    /// This connection's own outbound queue
    outbox: Sender<Multipart>,

    /// Request dispatcher
    dispatcher: Arc<Dispatcher>,

    /// Router, to unregister on exit
    router: Arc<Router>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Register a connection with the router and spawn its writer
    ///
    /// Returns the reader side; call `handle` to serve it.
    pub fn accept(
        stream: TcpStream,
        dispatcher: Arc<Dispatcher>,
        router: Arc<Router>,
    ) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let (id, peer, outbox, inbox) = router.register(stream.try_clone()?);
        let write_stream = stream.try_clone()?;
        let writer_addr = peer_addr.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("conn-{}-writer", id))
            .spawn(move || write_loop(BufWriter::new(write_stream), inbox, writer_addr));
        if let Err(e) = spawned {
            router.unregister(id);
            return Err(e.into());
        }

        Ok(Self {
            reader: BufReader::new(stream),
            id,
            peer,
            outbox,
            dispatcher,
            router,
            peer_addr,
        })
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads messages in a loop and dispatches them in arrival order.
    /// Returns when the client disconnects or an error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {} (peer {})", self.peer_addr, self.id);

        let result = self.read_loop();
        self.router.unregister(self.id);
        result
    }

    fn read_loop(&mut self) -> Result<()> {
        loop {
            let mut frames = match read_multipart(&mut self.reader) {
                Ok(frames) => frames,
                Err(ElevatorError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    // The stream is out of sync; answer once, then close
                    let response = encode_response(&Response::from(&e));
                    if self.outbox.send(vec![Bytes::from(response)]).is_err() {
                        tracing::debug!("Writer for {} already gone", self.peer_addr);
                    }
                    return Err(e);
                }
            };

            tracing::trace!(
                "Received {} frame(s) from {}",
                frames.len(),
                self.peer_addr
            );

            frames.insert(0, self.peer.clone());
            self.dispatcher.dispatch(frames);
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Writer side: drain the outbox until the router drops it
fn write_loop(mut writer: BufWriter<TcpStream>, outbox: Receiver<Multipart>, peer_addr: String) {
    for frames in outbox.iter() {
        if let Err(e) = write_multipart(&mut writer, &frames) {
            match e {
                ElevatorError::Io(ref io_err) if is_disconnect(io_err.kind()) => {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        peer_addr,
                        e
                    );
                }
                _ => tracing::warn!("Error writing to {}: {}", peer_addr, e),
            }
            return;
        }
    }
}

fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        kind,
        UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected
    )
}
