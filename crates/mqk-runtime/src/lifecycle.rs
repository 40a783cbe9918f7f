//! Process lifecycle: the tick loop and the signal-driven shutdown split
//! between graceful (current cycle completes, lock releases normally) and
//! forced (lock removed directly, no further cycle work attempted).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mqk_execution::BrokerAdapter;
use tracing::{error, info, warn};

use crate::engine::Engine;

/// Drives `engine.tick` on `tick_period` until `stop` is observed true
/// between ticks. The in-flight tick itself is never preempted — the engine
/// is single-threaded cooperative by design, so the only safe place to
/// check for shutdown is between cycles.
pub async fn run_until_stopped<B: BrokerAdapter>(engine: &mut Engine<B>, tick_period: Duration, stop: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(tick_period);
    loop {
        interval.tick().await;
        if stop.load(Ordering::SeqCst) {
            return;
        }

        match engine.tick(Utc::now()) {
            Ok(report) => {
                info!(?report, "tick complete");
                if !report.audit_healthy {
                    warn!("order audit unhealthy: at least one append has failed");
                }
            }
            Err(err) => error!(%err, "tick failed"),
        }

        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// First SIGINT/SIGTERM sets `stop` so the running loop exits after its
/// current cycle and the caller can release the lock normally. A second
/// signal is forced termination: it removes the lock file directly and
/// exits the process immediately, skipping whatever cycle is in flight.
pub fn spawn_signal_watcher(stop: Arc<AtomicBool>, lock_path: PathBuf) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("shutdown requested: will stop after the current cycle");
        stop.store(true, Ordering::SeqCst);

        let _ = tokio::signal::ctrl_c().await;
        warn!("forced termination: releasing lock without completing the cycle");
        let _ = std::fs::remove_file(&lock_path);
        std::process::exit(130);
    });
}
