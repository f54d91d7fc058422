//! Reply router
//!
//! Maps the first identity frame of a reply to the connection it came from.
//! This is the only place where an identity is tied to a socket; everything
//! upstream treats the identity as opaque bytes.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;

use crate::database::Reply;
use crate::protocol::encode_response;

use super::frame::Multipart;

/// A registered connection
struct Peer {
    /// Outbound queue drained by the connection's writer thread
    outbox: Sender<Multipart>,

    /// Socket handle used to force the connection closed
    stream: TcpStream,
}

/// Routes replies to connection writers by peer identity
#[derive(Default)]
pub struct Router {
    peers: RwLock<HashMap<u64, Peer>>,
    next_id: AtomicU64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    ///
    /// Returns the peer id, its identity frame, and both ends of the
    /// outbound queue the writer thread drains.
    pub fn register(
        &self,
        stream: TcpStream,
    ) -> (u64, Bytes, Sender<Multipart>, Receiver<Multipart>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (outbox, inbox) = channel::unbounded();
        self.peers.write().insert(
            id,
            Peer {
                outbox: outbox.clone(),
                stream,
            },
        );
        (id, peer_frame(id), outbox, inbox)
    }

    /// Forget a connection; its writer exits once the queue is empty
    pub fn unregister(&self, id: u64) {
        self.peers.write().remove(&id);
    }

    /// Number of registered connections
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Encode a reply and queue it on the owning connection
    ///
    /// Returns false when the connection is gone.
    pub fn route(&self, reply: Reply) -> bool {
        let Some(id) = reply.identity.peer().and_then(peer_id) else {
            tracing::warn!("Reply without a valid peer frame dropped");
            return false;
        };

        let mut frames = reply.identity.into_frames();
        frames.remove(0);
        frames.push(Bytes::from(encode_response(&reply.response)));

        match self.peers.read().get(&id) {
            Some(peer) => peer.outbox.send(frames).is_ok(),
            None => {
                tracing::debug!("Reply for vanished peer {} dropped", id);
                false
            }
        }
    }

    /// Shut down every registered socket
    pub fn close_all(&self) {
        for (id, peer) in self.peers.write().drain() {
            if let Err(e) = peer.stream.shutdown(Shutdown::Both) {
                tracing::debug!("Closing peer {}: {}", id, e);
            }
        }
    }
}

/// Route replies until every reply sender is gone
pub fn run_router(router: Arc<Router>, replies: Receiver<Reply>) {
    for reply in replies.iter() {
        router.route(reply);
    }
    tracing::debug!("Reply router stopped");
}

/// Identity frame for a peer id
pub fn peer_frame(id: u64) -> Bytes {
    Bytes::copy_from_slice(&id.to_be_bytes())
}

/// Peer id from an identity frame
pub fn peer_id(frame: &Bytes) -> Option<u64> {
    let bytes: [u8; 8] = frame.as_ref().try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
