//! Append-only audit log: one JSON object per line, optionally hash-chained
//! for tamper evidence. This is the durable compliance trail, distinct from
//! `tracing` telemetry — a write failure here marks the engine unhealthy but
//! never rolls back the action it was recording.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// When to roll the current log file over to a dated sibling and start a
/// fresh one. Either condition, whichever comes first, triggers a rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: Option<u64>,
    pub rotate_daily: bool,
}

impl RotationPolicy {
    pub fn none() -> Self {
        Self { max_bytes: None, rotate_daily: false }
    }

    pub fn size_or_daily(max_bytes: u64) -> Self {
        Self { max_bytes: Some(max_bytes), rotate_daily: true }
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Append-only audit writer. Writes JSON Lines (one event per line).
/// Optional hash chain: each event can include hash_prev + hash_self.
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Monotonically increasing sequence counter for `event_id` derivation.
    /// Starts at 0 and increments on every `append` call, including across
    /// rotations — it identifies events written by this writer instance, not
    /// position within the current file.
    seq: u64,
    rotation: RotationPolicy,
    current_day: Option<NaiveDate>,
}

impl AuditWriter {
    /// Creates the audit writer and ensures parent dirs exist. No rotation.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        Self::with_rotation(path, hash_chain, RotationPolicy::none())
    }

    pub fn with_rotation(path: impl AsRef<Path>, hash_chain: bool, rotation: RotationPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
            rotation,
            current_day: None,
        })
    }

    /// Set last hash explicitly (e.g., after reading last line on restart).
    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Set the sequence counter when resuming an existing log after restart.
    /// Pass the number of events already written (the next event's seq = this value).
    /// Must be called in conjunction with `set_last_hash` for correct restart semantics.
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    /// Current sequence counter (equals the number of events appended so far).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, rotating the file first if the rotation policy
    /// demands it.
    pub fn append(&mut self, run_id: Uuid, topic: &str, event_type: &str, payload: Value) -> Result<AuditEvent> {
        let ts_utc = Utc::now();
        self.rotate_if_needed(ts_utc)?;

        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;
        self.seq += 1;

        let mut ev = AuditEvent {
            event_id,
            run_id,
            ts_utc,
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            let prev = self.last_hash.clone();
            ev.hash_prev = prev;

            let self_hash = compute_event_hash(&ev)?;
            ev.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        Ok(ev)
    }

    fn rotate_if_needed(&mut self, now: DateTime<Utc>) -> Result<()> {
        let today = now.date_naive();
        let day_rolled = self.rotation.rotate_daily
            && self.current_day.map(|d| d != today).unwrap_or(false);
        self.current_day = Some(today);

        let size_exceeded = match self.rotation.max_bytes {
            Some(max) => fs::metadata(&self.path).map(|m| m.len() >= max).unwrap_or(false),
            None => false,
        };

        if !day_rolled && !size_exceeded {
            return Ok(());
        }

        let rotated = self.path.with_extension(format!(
            "{}.{}",
            self.path.extension().and_then(|e| e.to_str()).unwrap_or("jsonl"),
            now.format("%Y%m%dT%H%M%S%.fZ"),
        ));
        fs::rename(&self.path, &rotated).with_context(|| format!("rotate audit log {:?} -> {:?}", self.path, rotated))?;
        tracing::info!(from = ?self.path, to = ?rotated, "rotated audit log");
        self.last_hash = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Write a single line to file (with trailing newline), then fsync the data
/// to disk before returning. Audit durability is fsync-on-append, not
/// fsync-on-close.
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes()).context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    f.sync_data().with_context(|| format!("fsync audit log {:?}", path))?;
    Ok(())
}

/// Derive a deterministic event_id from chain state + payload + seq. No RNG
/// is involved so a replayed append sequence reproduces identical ids.
fn derive_event_id(last_hash: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let mut hasher = Sha256::new();
    hasher.update(last_hash.unwrap_or("").as_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(serde_json::to_vec(payload).context("serialize payload for event_id")?);
    let digest = hasher.finalize();
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &digest[..]))
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One event == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash chain is computed from canonical JSON of event WITHOUT hash_self (to avoid self-reference).
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of an audit log file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref()).with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Verify the hash chain integrity of an audit log string (JSONL content).
/// Same logic as [`verify_hash_chain`] but operates on an in-memory `&str`.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = serde_json::from_str(trimmed).with_context(|| format!("parse audit event at line {}", i + 1))?;

        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("hash_prev mismatch: expected {:?}, got {:?}", prev_hash, ev.hash_prev),
            });
        }

        if let Some(ref claimed_hash) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {}, recomputed {}", claimed_hash, recomputed),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}
