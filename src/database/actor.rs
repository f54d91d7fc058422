//! Database actor
//!
//! A dedicated worker thread that exclusively owns one engine handle and
//! executes queued jobs one at a time, in arrival order.
//!
//! ## Lifecycle
//! ```text
//!   spawn(engine) ──────────────► worker loop: recv job → execute → reply → recv ...
//!   spawn_opening(path) ─► open ─┘     │
//!                           │ failed   │
//!                           ▼          │
//!              reject queued jobs      │
//!                                      │
//!   stop(): drop sender ───────────────┘ queue drains, loop ends, engine closed, join
//! ```
//!
//! Stopping drains: every job already accepted onto the queue still runs
//! and gets its reply before the engine is closed. With `spawn_opening` the
//! queue accepts jobs before the engine is open, so the submitter never
//! waits on engine recovery.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::config::StorageEngineConfig;
use crate::engine::Engine;
use crate::error::{ElevatorError, Result};
use crate::protocol::{Command, Identity, Response};

/// One unit of work for a database actor
#[derive(Debug)]
pub struct Job {
    /// Who the reply is addressed to
    pub identity: Identity,

    /// What to execute
    pub command: Command,

    /// Where the reply goes
    pub reply_to: Sender<Reply>,
}

/// An actor's answer to one job
#[derive(Debug, Clone)]
pub struct Reply {
    /// Identity copied from the job
    pub identity: Identity,

    /// Result of the execution
    pub response: Response,
}

/// Handle on a running actor, held by the mounted database
pub struct ActorHandle {
    /// Inbound queue; dropping it closes the queue
    queue: Sender<Job>,

    /// Worker thread, returns the engine close result
    worker: JoinHandle<Result<()>>,
}

impl ActorHandle {
    /// Start a worker owning `engine`
    pub fn spawn(name: &str, engine: Engine) -> Result<Self> {
        let (queue, inbox) = channel::unbounded();
        let db_name = name.to_string();

        let worker = thread::Builder::new()
            .name(format!("db-{}", name))
            .spawn(move || run(db_name, engine, inbox))?;

        Ok(Self { queue, worker })
    }

    /// Start a worker that opens the engine at `path` itself
    ///
    /// Jobs can be submitted right away and wait in the queue while the
    /// engine opens. The returned channel reports the open result once. If
    /// the open fails, `on_open_failure` runs before that report and every
    /// queued job is answered with the open error.
    pub fn spawn_opening<F>(
        name: &str,
        path: PathBuf,
        config: StorageEngineConfig,
        on_open_failure: F,
    ) -> Result<(Self, Receiver<Result<()>>)>
    where
        F: FnOnce() + Send + 'static,
    {
        let (queue, inbox) = channel::unbounded();
        let (opened_tx, opened) = channel::bounded(1);
        let db_name = name.to_string();

        let worker = thread::Builder::new()
            .name(format!("db-{}", name))
            .spawn(move || match Engine::open(&path, &config) {
                Ok(engine) => {
                    report_open(&db_name, &opened_tx, Ok(()));
                    run(db_name, engine, inbox)
                }
                Err(e) => {
                    tracing::warn!("Database {} failed to open: {}", db_name, e);
                    let response = Response::from(&e);
                    on_open_failure();
                    report_open(&db_name, &opened_tx, Err(e));
                    reject(db_name, response, inbox);
                    Ok(())
                }
            })?;

        Ok((Self { queue, worker }, opened))
    }

    /// Enqueue a job; never blocks
    pub fn submit(&self, job: Job) -> Result<()> {
        self.queue
            .send(job)
            .map_err(|e| ElevatorError::DatabaseUnmounted(format!("worker gone: {}", e)))
    }

    /// Number of jobs waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Close the queue, wait for it to drain, and close the engine
    pub fn stop(self) -> Result<()> {
        drop(self.queue);
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::other("database worker panicked").into()),
        }
    }
}

/// Worker loop
fn run(name: String, engine: Engine, inbox: Receiver<Job>) -> Result<()> {
    tracing::debug!("Database {} worker started", name);

    for job in inbox.iter() {
        tracing::trace!("Database {} executing {:?}", name, job.command.opcode());

        let response = engine.execute(job.command);
        let reply = Reply {
            identity: job.identity,
            response,
        };

        // The caller may have gone away; the work is done either way
        if job.reply_to.send(reply).is_err() {
            tracing::debug!("Database {}: reply dropped, receiver closed", name);
        }
    }

    tracing::debug!("Database {} worker draining done, closing engine", name);
    engine.close()
}

/// Answer every queued job with the same error until the queue closes
fn reject(name: String, response: Response, inbox: Receiver<Job>) {
    let mut rejected = 0usize;
    for job in inbox.iter() {
        let reply = Reply {
            identity: job.identity,
            response: response.clone(),
        };
        if job.reply_to.send(reply).is_err() {
            tracing::debug!("Database {}: reply dropped, receiver closed", name);
        }
        rejected += 1;
    }
    tracing::debug!("Database {} rejected {} queued job(s)", name, rejected);
}

fn report_open(name: &str, opened: &Sender<Result<()>>, result: Result<()>) {
    // On-demand mounts do not wait for the outcome
    if opened.send(result).is_err() {
        tracing::trace!("Database {}: nobody waiting on open", name);
    }
}
