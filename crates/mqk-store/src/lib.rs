//! mqk-store
//!
//! The Strategy Store: atomic load/persist of the strategy collection to a
//! single JSON file. Every write goes through a temp-file-then-rename so no
//! concurrent reader ever observes a torn file, and the on-disk shape is
//! always the canonical variant name regardless of which alias was read.

mod convert;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mqk_schemas::WireStrategy;
use mqk_strategy::Strategy;

/// Errors a store operation can surface. Kept as a plain enum, not `anyhow`,
/// because callers (the engine cycle) branch on the distinction between "no
/// such record" and "the file is corrupt".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Serde(String),
    /// A record parsed as JSON but failed the domain-conversion step (e.g. an
    /// unrecognized variant name, an unparseable decimal price).
    InvalidRecord { id: String, reason: String },
    NotFound { id: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "store io error: {msg}"),
            StoreError::Serde(msg) => write!(f, "store serialization error: {msg}"),
            StoreError::InvalidRecord { id, reason } => write!(f, "invalid strategy record {id}: {reason}"),
            StoreError::NotFound { id } => write!(f, "no strategy with id {id}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persists the strategy collection as a single JSON array at `path`.
pub struct StrategyStore {
    path: PathBuf,
}

impl StrategyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every record in the file, canonicalizing variant aliases and
    /// converting wire decimal strings to integer micros. An absent file
    /// reads as an empty collection — nothing has been persisted yet.
    pub fn load_all(&self) -> Result<Vec<Strategy>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut values: Vec<serde_json::Value> = serde_json::from_str(&raw).map_err(|e| StoreError::Serde(e.to_string()))?;
        let mut out = Vec::with_capacity(values.len());
        for value in values.iter_mut() {
            convert::canonicalize_variant_tag(value)?;
            let wire: WireStrategy = serde_json::from_value(value.clone()).map_err(|e| StoreError::Serde(e.to_string()))?;
            out.push(convert::from_wire(&wire)?);
        }
        Ok(out)
    }

    pub fn load(&self, id: &str) -> Result<Option<Strategy>, StoreError> {
        Ok(self.load_all()?.into_iter().find(|s| s.id == id))
    }

    /// Inserts or replaces the record with `strategy.id`, then atomically
    /// rewrites the whole file (write-to-temp-then-rename).
    pub fn upsert(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let mut all: BTreeMap<String, Strategy> = self.load_all()?.into_iter().map(|s| (s.id.clone(), s)).collect();
        all.insert(strategy.id.clone(), strategy.clone());
        self.write_all(all.into_values().collect())
    }

    /// Removes the record with `id`. Returns whether a record was actually
    /// removed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let all = self.load_all()?;
        let before = all.len();
        let remaining: Vec<Strategy> = all.into_iter().filter(|s| s.id != id).collect();
        let removed = remaining.len() != before;
        if removed {
            self.write_all(remaining)?;
        }
        Ok(removed)
    }

    /// Every record whose `is_active(now)` predicate holds, i.e. enabled and
    /// not waiting on a future `schedule_at`.
    pub fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Strategy>, StoreError> {
        Ok(self.load_all()?.into_iter().filter(|s| s.is_active(now)).collect())
    }

    fn write_all(&self, strategies: Vec<Strategy>) -> Result<(), StoreError> {
        let wire: Vec<WireStrategy> = strategies.iter().map(convert::to_wire).collect();
        let json = serde_json::to_string_pretty(&wire).map_err(|e| StoreError::Serde(e.to_string()))?;

        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.write_all(json.as_bytes()).map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.to_string()))?;
        tracing::debug!(path = ?self.path, count = strategies.len(), "strategy store written");
        Ok(())
    }
}
