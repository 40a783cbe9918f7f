use std::path::PathBuf;
use std::time::Duration;

use mqk_risk::PolicyConfig;

/// Everything the engine binary needs to run one configuration directory's
/// strategies: where the store/lock/audit files live, the cycle cadence, and
/// the Safety Gate policy.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub strategy_store_path: PathBuf,
    pub lock_path: PathBuf,
    pub order_audit_path: PathBuf,
    pub engine_audit_path: PathBuf,
    pub tick_period: Duration,
    pub initial_cash_micros: i64,
    pub policy: PolicyConfig,
}

impl EngineConfig {
    /// Lays out the engine's files under `dir` with the spec's default 60s
    /// tick period and a fail-closed policy; callers override individual
    /// fields for tests or a production policy opt-in.
    pub fn conservative_defaults(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            strategy_store_path: dir.join("strategies.json"),
            lock_path: dir.join("engine.lock"),
            order_audit_path: dir.join("audit").join("orders.jsonl"),
            engine_audit_path: dir.join("audit").join("engine.jsonl"),
            tick_period: Duration::from_secs(60),
            initial_cash_micros: 100_000 * 1_000_000,
            policy: PolicyConfig::conservative_defaults(),
        }
    }
}
