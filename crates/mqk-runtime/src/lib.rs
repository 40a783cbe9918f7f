//! mqk-runtime
//!
//! Wires the Clock & Scheduler, Safety Gate, Order Router, Strategy Store,
//! and Audit Log into one engine cycle, plus the file-based lock that
//! guarantees a single writer per configuration directory. Everything here
//! is a thin composition layer — the decision logic it calls lives in
//! `mqk-strategy`, `mqk-risk`, and `mqk-execution` and is unchanged from
//! what the backtest driver exercises.

mod config;
mod engine;
mod lifecycle;
mod lock;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, TickReport};
pub use lifecycle::{run_until_stopped, spawn_signal_watcher};
pub use lock::{EngineLock, LockError};
