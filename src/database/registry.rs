//! Database registry
//!
//! Thread-safe name → database catalogue, durable across restarts.
//!
//! ## Concurrency
//! - `databases`: `RwLock<HashMap>`; lookups share the read lock, create and
//!   drop take the write lock and hold it across the catalogue rewrite
//! - Each `Database` guards its own mount state, so mounting or executing on
//!   one database never holds the registry lock
//! - A database's state lock is never acquired first under the write lock:
//!   drop retires the database before taking it
//!
//! ## Consistency
//! Create and drop mutate the map first, then rewrite the catalogue. When the
//! rewrite fails the map mutation is rolled back, so memory and disk never
//! diverge.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::{Config, StorageEngineConfig};
use crate::error::{ElevatorError, Result};

use super::{validate_name, Catalogue, CatalogueEntry, Database, DatabaseInfo, Job};

/// Registry of all databases known to the server
pub struct DatabaseRegistry {
    /// All databases, mounted or not
    databases: RwLock<HashMap<String, Arc<Database>>>,

    /// Where the catalogue is persisted
    catalogue_path: PathBuf,

    /// Parent directory of every database directory
    data_root: PathBuf,

    /// Engine settings applied on every mount
    engine_config: StorageEngineConfig,
}

impl DatabaseRegistry {
    /// Load the registry from the catalogue at `catalogue_path`
    ///
    /// Every entry comes back unmounted, rooted at `data_root/<name>`.
    /// Fails with `CatalogueCorrupt` if the catalogue cannot be parsed.
    pub fn load(
        catalogue_path: impl Into<PathBuf>,
        data_root: impl Into<PathBuf>,
        engine_config: StorageEngineConfig,
    ) -> Result<Self> {
        let catalogue_path = catalogue_path.into();
        let data_root = data_root.into();
        let catalogue = Catalogue::load(&catalogue_path)?;

        let mut databases = HashMap::with_capacity(catalogue.databases.len());
        for (name, entry) in catalogue.databases {
            validate_name(&name)
                .map_err(|e| ElevatorError::CatalogueCorrupt(e.to_string()))?;

            let path = data_root.join(&name);
            if entry.path != path {
                tracing::debug!(
                    "Database {} moved from {} to {}",
                    name,
                    entry.path.display(),
                    path.display()
                );
            }

            let database = Arc::new(Database::new(name.clone(), entry.id, path));
            databases.insert(name, database);
        }

        tracing::info!(
            "Loaded {} database(s) from {}",
            databases.len(),
            catalogue_path.display()
        );

        Ok(Self {
            databases: RwLock::new(databases),
            catalogue_path,
            data_root,
            engine_config,
        })
    }

    /// Load the registry using the paths and engine settings of `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::load(
            &config.core.store_path,
            &config.core.data_root,
            config.storage_engine.clone(),
        )
    }

    /// Get a database by name
    pub fn lookup(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ElevatorError::DatabaseNotFound(name.to_string()))
    }

    /// Check if a database exists
    pub fn contains(&self, name: &str) -> bool {
        self.databases.read().contains_key(name)
    }

    /// Number of registered databases
    pub fn len(&self) -> usize {
        self.databases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a new, unmounted database
    pub fn create(&self, name: &str) -> Result<Arc<Database>> {
        validate_name(name)?;

        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(ElevatorError::DatabaseExists(name.to_string()));
        }

        // Not in the catalogue, so anything here is left over from an
        // earlier database of the same name
        let path = self.data_root.join(name);
        if path.exists() {
            tracing::warn!("Clearing leftover files for {} at {}", name, path.display());
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;

        let database = Arc::new(Database::new(name, Uuid::new_v4().to_string(), path));
        databases.insert(name.to_string(), Arc::clone(&database));

        if let Err(e) = self.persist_locked(&databases) {
            databases.remove(name);
            if let Err(cleanup) = fs::remove_dir(database.path()) {
                tracing::debug!("Could not remove {}: {}", database.path().display(), cleanup);
            }
            tracing::warn!("Create {} rolled back: {}", name, e);
            return Err(e);
        }

        tracing::info!("Database {} created (id {})", name, database.id());
        Ok(database)
    }

    /// Drop an unmounted database and delete its files
    ///
    /// Fails with `DatabaseMounted` while mounted or unmounting; the
    /// catalogue and the files are left untouched in that case. Once the
    /// catalogue no longer lists the database the drop has succeeded, even
    /// if some files could not be deleted.
    pub fn drop_database(&self, name: &str) -> Result<()> {
        let database = self.lookup(name)?;
        database.retire()?;

        let mut databases = self.databases.write();
        databases.remove(name);

        if let Err(e) = self.persist_locked(&databases) {
            database.restore();
            databases.insert(name.to_string(), database);
            tracing::warn!("Drop {} rolled back: {}", name, e);
            return Err(e);
        }

        // Still under the write lock, so a concurrent create of the same name
        // cannot have claimed the directory yet
        if database.path().exists() {
            if let Err(e) = fs::remove_dir_all(database.path()) {
                tracing::warn!(
                    "Database {} dropped but {} could not be removed: {}",
                    name,
                    database.path().display(),
                    e
                );
            }
        }

        tracing::info!("Database {} dropped", name);
        Ok(())
    }

    /// Mount a database by name
    pub fn mount(&self, name: &str) -> Result<()> {
        self.lookup(name)?.mount(&self.engine_config)
    }

    /// Unmount a database by name
    pub fn unmount(&self, name: &str) -> Result<()> {
        self.lookup(name)?.unmount()
    }

    /// Route a job to a database, mounting it on demand
    pub fn dispatch(&self, name: &str, job: Job) -> Result<()> {
        self.lookup(name)?.dispatch(job, &self.engine_config)
    }

    /// Snapshot of every database, sorted by name
    pub fn list(&self) -> Vec<DatabaseInfo> {
        let mut infos: Vec<DatabaseInfo> = self
            .databases
            .read()
            .values()
            .map(|db| db.info())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Create `name` unless it exists; returns whether it was created
    pub fn ensure_default(&self, name: &str) -> Result<bool> {
        match self.create(name) {
            Ok(_) => Ok(true),
            Err(ElevatorError::DatabaseExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rewrite the catalogue from the in-memory map
    pub fn persist(&self) -> Result<()> {
        let databases = self.databases.read();
        self.persist_locked(&databases)
    }

    /// Unmount every mounted database, draining their queues
    ///
    /// Attempts all databases and returns the first error.
    pub fn shutdown(&self) -> Result<()> {
        let mounted: Vec<Arc<Database>> = self
            .databases
            .read()
            .values()
            .filter(|db| db.is_mounted())
            .cloned()
            .collect();

        let mut first_error = None;
        for database in mounted {
            match database.unmount() {
                Ok(()) | Err(ElevatorError::AlreadyUnmounted(_)) => {}
                Err(e) => {
                    tracing::warn!("Unmount of {} failed during shutdown: {}", database.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Engine settings applied on mount
    pub fn engine_config(&self) -> &StorageEngineConfig {
        &self.engine_config
    }

    pub fn catalogue_path(&self) -> &Path {
        &self.catalogue_path
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    fn persist_locked(&self, databases: &HashMap<String, Arc<Database>>) -> Result<()> {
        let catalogue = Catalogue {
            databases: databases
                .iter()
                .map(|(name, db)| {
                    let entry = CatalogueEntry {
                        id: db.id().to_string(),
                        path: db.path().to_path_buf(),
                    };
                    (name.clone(), entry)
                })
                .collect(),
        };
        catalogue.write_atomic(&self.catalogue_path)
    }
}
