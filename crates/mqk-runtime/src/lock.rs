//! File-based advisory lock guaranteeing a single engine writer per
//! configuration directory. The lock file's presence, not an OS-level flock,
//! is the source of truth — it must survive being inspected by an operator
//! with a text editor.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    AlreadyHeld { owner: String, started_at: String },
    Io(String),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::AlreadyHeld { owner, started_at } => {
                write!(f, "lock already held by {owner} since {started_at}")
            }
            LockError::Io(msg) => write!(f, "lock io error: {msg}"),
        }
    }
}

impl std::error::Error for LockError {}

/// An acquired engine lock. Dropping this without calling [`EngineLock::release`]
/// leaves the lock file in place — deliberate, since a crashed process should
/// not silently hand the store to a second writer; an operator must confirm
/// the crash and remove the stale lock (or restart cleanly, which calls
/// `release` itself).
pub struct EngineLock {
    path: PathBuf,
}

impl EngineLock {
    /// Acquires the lock at `path`, recording `owner`'s identity and the
    /// current instant. Fails if the file already exists.
    pub fn acquire(path: impl Into<PathBuf>, owner: &str, started_at: DateTime<Utc>) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| LockError::Io(e.to_string()))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                let body = format_lock_body(owner, started_at);
                f.write_all(body.as_bytes()).map_err(|e| LockError::Io(e.to_string()))?;
                f.sync_data().map_err(|e| LockError::Io(e.to_string()))?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let (owner, started_at) = parse_lock_body(&path).unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
                Err(LockError::AlreadyHeld { owner, started_at })
            }
            Err(e) => Err(LockError::Io(e.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock by removing the file. Consumes `self` so a released
    /// lock cannot be used again.
    pub fn release(self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::Io(e.to_string())),
        }
    }
}

fn format_lock_body(owner: &str, started_at: DateTime<Utc>) -> String {
    format!("owner={owner}\nstarted_at={}\n", started_at.to_rfc3339())
}

fn parse_lock_body(path: &Path) -> Option<(String, String)> {
    let contents = fs::read_to_string(path).ok()?;
    let mut owner = None;
    let mut started_at = None;
    for line in contents.lines() {
        if let Some(v) = line.strip_prefix("owner=") {
            owner = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("started_at=") {
            started_at = Some(v.to_string());
        }
    }
    Some((owner?, started_at?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.lock");

        let lock = EngineLock::acquire(&path, "engine-1", t()).unwrap();
        let err = EngineLock::acquire(&path, "engine-2", t()).unwrap_err();
        assert_eq!(err, LockError::AlreadyHeld { owner: "engine-1".to_string(), started_at: t().to_rfc3339() });

        lock.release().unwrap();
    }

    #[test]
    fn acquire_succeeds_again_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.lock");

        let lock = EngineLock::acquire(&path, "engine-1", t()).unwrap();
        lock.release().unwrap();

        let lock2 = EngineLock::acquire(&path, "engine-2", t()).unwrap();
        lock2.release().unwrap();
    }
}
