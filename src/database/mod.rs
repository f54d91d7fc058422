//! Database Module
//!
//! Databases, their mount-state machine, and the registry that names them.
//!
//! ## State Machine
//! ```text
//!              mount()                    unmount()                 drain done
//!  UNMOUNTED ───────────► MOUNTED ───────────────────► UNMOUNTING ────────────► UNMOUNTED
//!      ▲   spawn worker,     │       close queue           │  drain, close
//!      │   open in worker    │                             │  engine, join
//!      └──── open failed ────┘                             └─ mount()/dispatch(): Unmounting
//! ```
//!
//! The state lives behind a `parking_lot::Mutex` that is only held for the
//! state change itself, never across an engine open or a drain. Jobs reach
//! the worker through an unbounded queue that exists before the engine is
//! open; the engine itself is never touched outside the worker thread.

mod actor;
mod catalogue;
mod registry;

pub use actor::{ActorHandle, Job, Reply};
pub use catalogue::{Catalogue, CatalogueEntry};
pub use registry::DatabaseRegistry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use crate::config::StorageEngineConfig;
use crate::error::{ElevatorError, Result};

/// Maximum database name length
pub const MAX_NAME_LEN: usize = 128;

/// Externally visible mount state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStatus {
    Unmounted,
    Mounted,
    /// Queue closed, worker still draining
    Unmounting,
}

impl MountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountStatus::Unmounted => "unmounted",
            MountStatus::Mounted => "mounted",
            MountStatus::Unmounting => "unmounting",
        }
    }
}

/// Internal mount state; the handle exists exactly when mounted
enum MountState {
    Unmounted,
    Mounted(ActorHandle),
    /// The unmounting thread owns the handle while it drains
    Unmounting,
    /// Removed from the registry; can never be mounted again
    Dropped,
}

impl MountState {
    /// Public status, `None` once dropped
    fn status(&self) -> Option<MountStatus> {
        match self {
            MountState::Unmounted => Some(MountStatus::Unmounted),
            MountState::Mounted(_) => Some(MountStatus::Mounted),
            MountState::Unmounting => Some(MountStatus::Unmounting),
            MountState::Dropped => None,
        }
    }
}

/// A named database and its (optional) running actor
pub struct Database {
    /// Unique, stable name
    name: String,

    /// Identifier assigned at creation
    id: String,

    /// Engine directory
    path: PathBuf,

    /// Mount state, guarding the actor handle; shared with a worker that is
    /// still opening its engine
    state: Arc<Mutex<MountState>>,
}

/// Snapshot of a database for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub id: String,
    pub path: PathBuf,
    pub status: MountStatus,
}

impl Database {
    /// Create an unmounted database entry
    pub fn new(name: impl Into<String>, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            path: path.into(),
            state: Arc::new(Mutex::new(MountState::Unmounted)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mount state
    pub fn status(&self) -> MountStatus {
        self.state.lock().status().unwrap_or(MountStatus::Unmounted)
    }

    pub fn is_mounted(&self) -> bool {
        self.status() == MountStatus::Mounted
    }

    /// Snapshot for listings
    pub fn info(&self) -> DatabaseInfo {
        DatabaseInfo {
            name: self.name.clone(),
            id: self.id.clone(),
            path: self.path.clone(),
            status: self.status(),
        }
    }

    /// Number of queued jobs not yet picked up by the worker
    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            MountState::Mounted(handle) => handle.pending(),
            MountState::Unmounted | MountState::Unmounting | MountState::Dropped => 0,
        }
    }

    /// Start the worker and wait for it to open the engine
    ///
    /// Fails with `AlreadyMounted` when mounted. An engine open failure is
    /// returned as is and leaves the database unmounted. The state lock is
    /// not held while the engine opens.
    pub fn mount(&self, config: &StorageEngineConfig) -> Result<()> {
        let opened = {
            let mut state = self.state.lock();
            match state.status() {
                Some(MountStatus::Unmounted) => self.start_locked(&mut state, config)?,
                Some(MountStatus::Mounted) => {
                    tracing::warn!("Database {} already mounted", self.name);
                    return Err(ElevatorError::AlreadyMounted(self.name.clone()));
                }
                Some(MountStatus::Unmounting) => {
                    return Err(ElevatorError::Unmounting(self.name.clone()))
                }
                None => return Err(ElevatorError::DatabaseNotFound(self.name.clone())),
            }
        };

        match opened.recv() {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::other("database worker exited before opening").into()),
        }
    }

    /// Stop accepting jobs, drain the queue, close the engine
    ///
    /// Fails with `AlreadyUnmounted` unless mounted. While the queue drains
    /// the database reports `Unmounting` and the state lock is free, so
    /// listings and drops never wait on the drain. The state is unmounted
    /// afterwards even if closing the engine reported an error.
    pub fn unmount(&self) -> Result<()> {
        let handle = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, MountState::Unmounting) {
                MountState::Mounted(handle) => handle,
                previous => {
                    *state = previous;
                    tracing::warn!("Database {} already unmounted", self.name);
                    return Err(ElevatorError::AlreadyUnmounted(self.name.clone()));
                }
            }
        };

        let result = handle.stop();
        *self.state.lock() = MountState::Unmounted;

        tracing::debug!("Database {} unmounted", self.name);
        result
    }

    /// Enqueue a job on a mounted database
    pub fn submit(&self, job: Job) -> Result<()> {
        match &*self.state.lock() {
            MountState::Mounted(handle) => handle.submit(job),
            MountState::Unmounted => Err(ElevatorError::DatabaseUnmounted(self.name.clone())),
            MountState::Unmounting => Err(ElevatorError::Unmounting(self.name.clone())),
            MountState::Dropped => Err(ElevatorError::DatabaseNotFound(self.name.clone())),
        }
    }

    /// Enqueue a job, mounting first when needed
    ///
    /// Never waits on the engine: a mount started here opens the engine in
    /// the worker while the job waits in its queue. Mount and enqueue happen
    /// under one lock acquisition, so a concurrent unmount cannot slip in
    /// between them.
    pub fn dispatch(&self, job: Job, config: &StorageEngineConfig) -> Result<()> {
        let mut state = self.state.lock();
        if state.status() == Some(MountStatus::Unmounted) {
            self.start_locked(&mut state, config)?;
        }
        match &*state {
            MountState::Mounted(handle) => handle.submit(job),
            MountState::Unmounted => Err(ElevatorError::DatabaseUnmounted(self.name.clone())),
            MountState::Unmounting => Err(ElevatorError::Unmounting(self.name.clone())),
            MountState::Dropped => Err(ElevatorError::DatabaseNotFound(self.name.clone())),
        }
    }

    /// Mark the database dropped; refuses unless unmounted
    ///
    /// Holding the state lock here keeps a concurrent `dispatch` from
    /// mounting a database whose files are about to be deleted.
    pub(crate) fn retire(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.status() {
            Some(MountStatus::Unmounted) => {
                *state = MountState::Dropped;
                Ok(())
            }
            Some(MountStatus::Mounted) | Some(MountStatus::Unmounting) => {
                Err(ElevatorError::DatabaseMounted(self.name.clone()))
            }
            None => Err(ElevatorError::DatabaseNotFound(self.name.clone())),
        }
    }

    /// Undo `retire` after a failed catalogue write
    pub(crate) fn restore(&self) {
        let mut state = self.state.lock();
        if state.status().is_none() {
            *state = MountState::Unmounted;
        }
    }

    /// Spawn a worker that opens the engine off this thread
    ///
    /// Leaves the state mounted. If the open fails, the worker itself puts
    /// the state back to unmounted before anyone hears about the failure.
    fn start_locked(
        &self,
        state: &mut MountState,
        config: &StorageEngineConfig,
    ) -> Result<Receiver<Result<()>>> {
        let shared = Arc::clone(&self.state);
        let name = self.name.clone();
        let (handle, opened) = ActorHandle::spawn_opening(
            &self.name,
            self.path.clone(),
            config.clone(),
            move || {
                let mut state = shared.lock();
                // An unmount already owns the handle otherwise
                if matches!(*state, MountState::Mounted(_)) {
                    *state = MountState::Unmounted;
                    tracing::debug!("Database {} back to unmounted", name);
                }
            },
        )?;
        *state = MountState::Mounted(handle);

        tracing::debug!("Database {} mounted", self.name);
        Ok(opened)
    }
}

/// Validate a database name
///
/// Allowed characters: [a-zA-Z0-9_-]
/// Length: 1-128 characters
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ElevatorError::InvalidDatabaseName(format!(
            "'{}': name must be 1-{} characters",
            name, MAX_NAME_LEN
        )));
    }

    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !valid {
        return Err(ElevatorError::InvalidDatabaseName(format!(
            "'{}': name can only contain a-z, A-Z, 0-9, _, -",
            name
        )));
    }

    Ok(())
}
