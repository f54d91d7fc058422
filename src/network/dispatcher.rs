//! Request dispatcher
//!
//! Turns one inbound multipart message into work:
//!
//! ```text
//! [identity..][payload] → decode → admin opcode? → run against registry
//!                                 → data opcode  → lookup → mount on demand
//!                                                 → enqueue on the actor
//! ```
//!
//! Every failure becomes an error reply addressed to the same identity;
//! nothing here can take down the connection or another database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::database::{DatabaseRegistry, Job, Reply};
use crate::error::{ElevatorError, Result};
use crate::protocol::{decode_request, Command, Identity, Request, Response};

use super::frame::Multipart;

/// Decodes requests and routes them to database actors
pub struct Dispatcher {
    /// Database registry
    registry: Arc<DatabaseRegistry>,

    /// Reply channel shared by every job
    replies: Sender<Reply>,

    /// Set once the server stops serving
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: Arc<DatabaseRegistry>, replies: Sender<Reply>) -> Self {
        Self {
            registry,
            replies,
            closed: AtomicBool::new(false),
        }
    }

    /// Handle one inbound message
    ///
    /// The last frame is the payload, everything before it is the identity.
    pub fn dispatch(&self, mut frames: Multipart) {
        let payload = match frames.pop() {
            Some(payload) if !frames.is_empty() => payload,
            _ => {
                tracing::warn!("Message without identity or payload dropped");
                return;
            }
        };
        let identity = Identity::new(frames);

        let request = match decode_request(&payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Undecodable request: {}", e);
                self.reply(identity, Response::from(&e));
                return;
            }
        };

        tracing::trace!(
            "Request for {}: {:?}",
            request.database,
            request.command.opcode()
        );

        if let Err(e) = self.route(identity.clone(), request) {
            self.reply(identity, Response::from(&e));
        }
    }

    /// Stop accepting new work
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Send a reply that did not go through an actor
    pub fn reply(&self, identity: Identity, response: Response) {
        if self.replies.send(Reply { identity, response }).is_err() {
            tracing::debug!("Reply channel closed, reply dropped");
        }
    }

    fn route(&self, identity: Identity, request: Request) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ElevatorError::Network("server is shutting down".to_string()));
        }

        if request.command.opcode().is_admin() {
            let response = self.admin(&request.database, &request.command)?;
            self.reply(identity, response);
            return Ok(());
        }

        let job = Job {
            identity,
            command: request.command,
            reply_to: self.replies.clone(),
        };
        self.registry.dispatch(&request.database, job)
    }

    /// Execute an administrative command against the registry
    fn admin(&self, name: &str, command: &Command) -> Result<Response> {
        match command {
            Command::DbCreate => self.registry.create(name).map(|_| Response::empty()),
            Command::DbDrop => self.registry.drop_database(name).map(|_| Response::empty()),
            Command::DbMount => self.registry.mount(name).map(|_| Response::empty()),
            Command::DbUnmount => self.registry.unmount(name).map(|_| Response::empty()),
            Command::DbList => {
                let pairs: Vec<(Vec<u8>, Vec<u8>)> = self
                    .registry
                    .list()
                    .into_iter()
                    .map(|info| (info.name.into_bytes(), info.status.as_str().as_bytes().to_vec()))
                    .collect();
                Ok(Response::pairs(&pairs))
            }
            other => Err(ElevatorError::MalformedRequest(format!(
                "{:?} is not an administrative command",
                other.opcode()
            ))),
        }
    }
}
