//! Binding surface
//!
//! A small, flat API for embedding the engine behind a foreign-function or
//! scripting boundary. Every call returns either its result or a
//! `BindingError` carrying a stable kind plus a human readable message.
//!
//! ```text
//!   open(path, create_if_missing) ─► DbHandle
//!   put / insert / get / delete (&DbHandle)
//!   close(DbHandle)
//! ```

use std::fmt;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{ErrorKind, StrataError};

/// An open database
#[derive(Debug)]
pub struct DbHandle {
    engine: Engine,
}

impl DbHandle {
    /// The engine behind this handle, for callers that need more than the
    /// flat API
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Error reported across the binding boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BindingError {}

impl From<StrataError> for BindingError {
    fn from(err: StrataError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type BindingResult<T> = std::result::Result<T, BindingError>;

/// Open (or create) the database at `path` with default settings
pub fn open(path: &str, create_if_missing: bool) -> BindingResult<DbHandle> {
    if path.is_empty() {
        return Err(BindingError {
            kind: ErrorKind::InvalidArgument,
            message: "path must not be empty".into(),
        });
    }
    let config = Config::builder()
        .data_dir(path)
        .create_if_missing(create_if_missing)
        .build();
    let engine = Engine::open(config)?;
    Ok(DbHandle { engine })
}

pub fn put(db: &DbHandle, key: &[u8], value: &[u8]) -> BindingResult<()> {
    Ok(db.engine.put(key, value)?)
}

/// Put unless the key already holds a value (`key_exists` error)
pub fn insert(db: &DbHandle, key: &[u8], value: &[u8]) -> BindingResult<()> {
    Ok(db.engine.insert(key, value)?)
}

/// Returns `(value, true)` when the key exists and `(empty, false)` when it
/// does not
pub fn get(db: &DbHandle, key: &[u8]) -> BindingResult<(Vec<u8>, bool)> {
    Ok(match db.engine.get(key)? {
        Some(value) => (value, true),
        None => (Vec::new(), false),
    })
}

pub fn delete(db: &DbHandle, key: &[u8]) -> BindingResult<()> {
    Ok(db.engine.delete(key)?)
}

/// Flush and release the database
pub fn close(db: DbHandle) -> BindingResult<()> {
    Ok(db.engine.close()?)
}
