//! Routing identity
//!
//! The frames that precede the payload of an inbound message. The transport
//! puts the connection's own identity first; any envelope frames the client
//! sent (request ids, correlation tokens) follow. The whole identity is
//! echoed in front of the reply, so it is opaque everywhere except in the
//! router that owns the connections.

use bytes::Bytes;

/// Opaque routing token carried from request to reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Identity {
    frames: Vec<Bytes>,
}

impl Identity {
    pub fn new(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// First frame, naming the connection the reply goes to
    pub fn peer(&self) -> Option<&Bytes> {
        self.frames.first()
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }
}
