//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single accept thread (non-blocking, polls the shutdown flag)
//! - Per connection: a reader thread that decodes and dispatches messages in
//!   arrival order, and a writer thread that drains the connection's replies
//! - One reply-router thread mapping reply identities back to connections
//! - Commands routed to per-database actors through the registry

mod connection;
mod dispatcher;
mod frame;
mod router;
mod server;

pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use frame::{read_multipart, write_multipart, Multipart, MAX_FRAMES};
pub use router::{peer_frame, peer_id, Router};
pub use server::Server;
