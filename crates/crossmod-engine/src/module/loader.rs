//! Module loading
//!
//! Fetching bytes and parsing them into a [`ModuleRecord`] is the embedder's
//! job; the engine only sees the [`Loader`] trait.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::record::ModuleRecord;

/// Errors a loader reports
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    /// The bytes could not be fetched
    #[error("{0}")]
    Fetch(String),

    /// The bytes could not be parsed
    #[error("{0}")]
    Syntax(String),
}

/// Produces the parsed record of a canonical identity
pub trait Loader: Send + Sync {
    fn load(&self, identity: &str) -> Result<ModuleRecord, LoadError>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> Result<ModuleRecord, LoadError> + Send + Sync,
{
    fn load(&self, identity: &str) -> Result<ModuleRecord, LoadError> {
        self(identity)
    }
}

/// Loader over a table of pre-parsed records
#[derive(Debug, Default)]
pub struct MemoryLoader {
    records: RwLock<FxHashMap<String, ModuleRecord>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, identity: &str, record: ModuleRecord) -> Self {
        self.insert(identity, record);
        self
    }

    pub fn insert(&self, identity: &str, record: ModuleRecord) {
        self.records.write().insert(identity.to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Loader for MemoryLoader {
    fn load(&self, identity: &str) -> Result<ModuleRecord, LoadError> {
        self.records
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| LoadError::Fetch(format!("no module registered as '{}'", identity)))
    }
}
