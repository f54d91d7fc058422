//! # Elevator
//!
//! A multi-tenant key-value server:
//! - Many named databases behind one endpoint, each its own RocksDB instance
//! - Persistent catalogue of databases, rewritten atomically on every change
//! - Mount on demand, unmount with queue drain
//! - One worker thread per mounted database; commands for the same database
//!   execute in arrival order
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                             │
//! │           (reader + writer thread per client)               │
//! └─────────────────────┬──────────────────────▲────────────────┘
//!                       │ [identity][payload]  │ [identity][response]
//! ┌─────────────────────▼───────────┐   ┌──────┴──────────────┐
//! │           Dispatcher            │   │    Reply Router     │
//! │  decode → admin / lookup+mount  │   │ (peer id → socket)  │
//! └─────────────────────┬───────────┘   └──────▲──────────────┘
//!                       │                      │
//!          ┌────────────┴────────────┐         │
//!          ▼                         ▼         │
//!   ┌─────────────┐          ┌─────────────┐   │
//!   │  db-alpha   │          │  db-beta    │───┘
//!   │ (actor +    │          │ (actor +    │
//!   │  RocksDB)   │          │  RocksDB)   │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod engine;
pub mod database;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ElevatorError, Result};
pub use config::Config;
pub use engine::Engine;
pub use database::DatabaseRegistry;
pub use network::Server;
pub use client::Client;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Elevator
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
