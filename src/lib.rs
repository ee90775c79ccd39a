//! # StrataDB
//!
//! An embedded, single-node key-value storage engine built as a
//! log-structured merge tree:
//! - Write-Ahead Logging (WAL) for durability, with torn-tail recovery
//! - Concurrent in-memory table for recent writes
//! - Immutable SSTables with bloom filters and block checksums
//! - Leveled compaction published through an atomic manifest
//! - Single-writer/multi-reader concurrency with a background worker
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Engine  /  binding (open/put/get/...)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌───────────────┐
//!   │     WAL     │          │   MemTables   │
//!   │  (Append)   │          │ active+frozen │
//!   └─────────────┘          └───────┬───────┘
//!                                    │ flush (background)
//!                                    ▼
//!                           ┌───────────────┐
//!                           │ Level Manager │
//!                           │ L0 .. Ln      │◄── compaction
//!                           │ + MANIFEST    │    (background)
//!                           └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod record;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod engine;
pub mod binding;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, Result, StrataError};
pub use config::{Compression, Config, ConfigBuilder, WalSyncStrategy};
pub use engine::{Engine, EngineStats, ScanOptions, WriteBatch};
pub use record::{Entry, Record};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
