//! Engine Module
//!
//! Storage engine adapter around one RocksDB instance.
//!
//! ## Responsibilities
//! - Translate `StorageEngineConfig` into RocksDB options
//! - Execute commands against the engine
//! - Keep every reply small enough for one transport frame
//! - Close the handle when the owning database is unmounted
//!
//! An `Engine` is never shared: the database actor that mounted it owns it
//! exclusively and is the only caller of its methods, so no locking happens
//! here.

use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, Direction, IteratorMode, Options, ReadOptions,
    WriteBatch, DB,
};

use crate::config::StorageEngineConfig;
use crate::error::{ElevatorError, Result};
use crate::protocol::{BatchOp, Command, Response, MAX_RESPONSE_PAYLOAD};

/// Storage engine handle for one database
pub struct Engine {
    /// Directory holding the RocksDB files
    path: PathBuf,

    /// Open RocksDB handle
    db: DB,

    /// Read options shared by point lookups and scans
    verify_checksums: bool,
}

impl Engine {
    /// Open or create an engine at `path`
    pub fn open(path: &Path, config: &StorageEngineConfig) -> Result<Self> {
        let options = Self::options(config);
        let db = DB::open(&options, path)?;

        tracing::debug!("Engine opened at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            db,
            verify_checksums: config.verify_checksums,
        })
    }

    /// Build RocksDB options from the engine configuration
    pub fn options(config: &StorageEngineConfig) -> Options {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_error_if_exists(false);

        options.set_compression_type(if config.compression {
            DBCompressionType::Snappy
        } else {
            DBCompressionType::None
        });
        options.set_max_open_files(config.max_open_files);
        options.set_paranoid_checks(config.verify_checksums);
        options.set_write_buffer_size(config.write_buffer_size);

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_block_size(config.block_size);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        options.set_block_based_table_factory(&block_opts);

        options
    }

    /// Execute a command and build the response
    ///
    /// Engine failures become error responses; they never escape. So does a
    /// reply that would not fit in one frame.
    pub fn execute(&self, command: Command) -> Response {
        let result = match command {
            Command::Get { key } => match self.get(&key) {
                Ok(Some(value)) => Ok(Response::ok(value)),
                Ok(None) => Err(ElevatorError::KeyNotFound),
                Err(e) => Err(e),
            },
            Command::Put { key, value } => self.put(&key, &value).map(|_| Response::empty()),
            Command::Delete { key } => self.delete(&key).map(|_| Response::empty()),
            Command::Range { start, end } => {
                self.range(&start, &end).map(|pairs| Response::pairs(&pairs))
            }
            Command::Slice { start, limit } => {
                self.slice(&start, limit as usize).map(|pairs| Response::pairs(&pairs))
            }
            Command::MGet { keys } => self
                .multi_get(&keys)
                .map(|values| Response::optional_fields(&values)),
            Command::Batch { ops } => self.batch(ops).map(|_| Response::empty()),
            Command::Ping => Ok(Response::ok(b"PONG".to_vec())),
            other => Err(ElevatorError::MalformedRequest(format!(
                "{:?} is not a database command",
                other.opcode()
            ))),
        };

        let response = result.and_then(|response| {
            if response.payload.len() > MAX_RESPONSE_PAYLOAD {
                Err(ElevatorError::ResultTooLarge(MAX_RESPONSE_PAYLOAD))
            } else {
                Ok(response)
            }
        });
        response.unwrap_or_else(|e| Response::from(&e))
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_opt(key, &self.read_options())?)
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    /// Delete a key (deleting a missing key is not an error)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete(key)?;
        Ok(())
    }

    /// Pairs with `start <= key < end`; an empty `end` is unbounded
    ///
    /// Stops with `ResultTooLarge` once the pairs outgrow one reply.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        let mut budget = ReplyBudget::default();
        let iter = self
            .db
            .iterator_opt(IteratorMode::From(start, Direction::Forward), self.read_options());

        for item in iter {
            let (key, value) = item?;
            if !end.is_empty() && key.as_ref() >= end {
                break;
            }
            budget.charge(8 + key.len() + value.len())?;
            pairs.push((key.into_vec(), value.into_vec()));
        }

        Ok(pairs)
    }

    /// Up to `limit` pairs starting at `start`
    ///
    /// Stops with `ResultTooLarge` once the pairs outgrow one reply.
    pub fn slice(&self, start: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::with_capacity(limit.min(1024));
        let mut budget = ReplyBudget::default();
        let iter = self
            .db
            .iterator_opt(IteratorMode::From(start, Direction::Forward), self.read_options());

        for item in iter.take(limit) {
            let (key, value) = item?;
            budget.charge(8 + key.len() + value.len())?;
            pairs.push((key.into_vec(), value.into_vec()));
        }

        Ok(pairs)
    }

    /// Values for several keys, `None` where a key is missing
    pub fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let read_options = self.read_options();
        let mut budget = ReplyBudget::default();
        keys.iter()
            .map(|key| {
                let value = self.db.get_opt(key, &read_options)?;
                budget.charge(1 + value.as_ref().map_or(0, |v| 4 + v.len()))?;
                Ok(value)
            })
            .collect()
    }

    /// Apply puts and deletes atomically
    pub fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.put(key, value),
                BatchOp::Delete { key } => batch.delete(key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush memtables and close the handle
    ///
    /// Dropping the handle releases the RocksDB lock file, so a later open on
    /// the same path succeeds.
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        tracing::debug!("Engine closed at {}", self.path.display());
        Ok(())
    }

    /// Get the data directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_options(&self) -> ReadOptions {
        let mut read_options = ReadOptions::default();
        read_options.set_verify_checksums(self.verify_checksums);
        read_options
    }
}

/// Running size of a reply payload under construction
#[derive(Default)]
struct ReplyBudget {
    used: usize,
}

impl ReplyBudget {
    fn charge(&mut self, bytes: usize) -> Result<()> {
        self.used += bytes;
        if self.used > MAX_RESPONSE_PAYLOAD {
            return Err(ElevatorError::ResultTooLarge(MAX_RESPONSE_PAYLOAD));
        }
        Ok(())
    }
}
