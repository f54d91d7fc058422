//! TCP Server
//!
//! Accepts connections and hands each one to its own reader/writer threads.
//! The accept loop itself never touches storage.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel;

use crate::config::Config;
use crate::database::DatabaseRegistry;
use crate::error::Result;

use super::connection::Connection;
use super::dispatcher::Dispatcher;
use super::router::{run_router, Router};

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// TCP server for Elevator
pub struct Server {
    /// Bound, non-blocking listener
    listener: TcpListener,

    /// Database registry, shared with the dispatcher
    registry: Arc<DatabaseRegistry>,

    /// Connection table for reply routing
    router: Arc<Router>,

    /// Set by `shutdown`, polled by the accept loop
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listen endpoint from `config`
    pub fn bind(config: &Config, registry: Arc<DatabaseRegistry>) -> Result<Self> {
        let listener = TcpListener::bind(config.core.listen_addr())?;
        listener.set_nonblocking(true)?;

        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry,
            router: Arc::new(Router::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops the server when set; hand it to signal handlers
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Start the server (blocking until shutdown)
    ///
    /// On shutdown: stop accepting, close every connection, wait for the
    /// readers, then unmount every database (draining their queues).
    pub fn run(&self) -> Result<()> {
        let (replies_tx, replies_rx) = channel::unbounded();
        let router = Arc::clone(&self.router);
        thread::Builder::new()
            .name("reply-router".to_string())
            .spawn(move || run_router(router, replies_rx))?;

        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&self.registry), replies_tx));
        let mut readers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    // Accepted sockets may inherit non-blocking mode on some platforms
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::warn!("Rejecting {}: {}", addr, e);
                        continue;
                    }
                    match self.spawn_connection(stream, &dispatcher) {
                        Ok(handle) => readers.push(handle),
                        Err(e) => {
                            tracing::warn!("Failed to set up connection from {}: {}", addr, e)
                        }
                    }
                    readers.retain(|h| !h.is_finished());
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                }
            }
        }

        tracing::info!("Shutting down: closing {} connection(s)", self.router.peer_count());
        dispatcher.close();
        self.router.close_all();
        for reader in readers {
            if reader.join().is_err() {
                tracing::warn!("Connection thread panicked");
            }
        }

        self.registry.shutdown()
    }

    fn spawn_connection(
        &self,
        stream: std::net::TcpStream,
        dispatcher: &Arc<Dispatcher>,
    ) -> Result<JoinHandle<()>> {
        let mut connection =
            Connection::accept(stream, Arc::clone(dispatcher), Arc::clone(&self.router))?;

        let handle = thread::Builder::new()
            .name(format!("conn-{}", connection.peer_addr()))
            .spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::debug!(
                        "Connection {} closed with error: {}",
                        connection.peer_addr(),
                        e
                    );
                }
            })?;

        Ok(handle)
    }

    /// Database registry served by this server
    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }
}
