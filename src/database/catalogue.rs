//! Catalogue persistence
//!
//! The catalogue is the on-disk list of databases, stored as JSON:
//!
//! ```text
//! { "databases": { "<name>": { "id": "<uuid>", "path": "<dir>" }, ... } }
//! ```
//!
//! It is read whole at startup and rewritten whole on every structural
//! change. Rewrites go to `<path>.tmp` first, are fsynced, then renamed over
//! the real file, so a crash mid-write never leaves a truncated catalogue.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ElevatorError, Result};

/// Persisted record for one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    /// Identifier assigned at creation
    pub id: String,

    /// Engine directory at the time the entry was written
    pub path: PathBuf,
}

/// Name → record mapping as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    pub databases: BTreeMap<String, CatalogueEntry>,
}

impl Catalogue {
    /// Read a catalogue; a missing file is an empty catalogue
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No catalogue at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = fs::read(path)?;
        serde_json::from_slice(&content)
            .map_err(|e| ElevatorError::CatalogueCorrupt(format!("{}: {}", path.display(), e)))
    }

    /// Atomically replace the catalogue at `path`
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        self.try_write_atomic(path)
            .map_err(|e| ElevatorError::CataloguePersist(format!("{}: {}", path.display(), e)))
    }

    fn try_write_atomic(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = Self::tmp_path(path);
        if let Err(e) = Self::write_and_rename(&content, &tmp_path, path) {
            if tmp_path.is_file() {
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    tracing::debug!("Could not remove {}: {}", tmp_path.display(), cleanup);
                }
            }
            return Err(e);
        }

        // Make the rename itself durable; not every platform can open a
        // directory for syncing
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                if let Err(e) = dir.sync_all() {
                    tracing::debug!("Could not sync {}: {}", parent.display(), e);
                }
            }
        }

        Ok(())
    }

    fn write_and_rename(content: &[u8], tmp_path: &Path, path: &Path) -> std::io::Result<()> {
        let mut file = File::create(tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp_path, path)
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}
