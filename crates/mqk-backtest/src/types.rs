use chrono::{DateTime, Utc};

use mqk_portfolio::Fill;
use mqk_risk::PolicyConfig;

/// One OHLC bar fed to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BacktestBar {
    pub symbol: String,
    pub ts_utc: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
}

/// Backtest run configuration: starting capital and the Safety Gate policy
/// every order is still evaluated against, exactly as in live execution.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
    pub initial_cash_micros: i64,
    pub policy: PolicyConfig,
}

impl BacktestConfig {
    pub fn new(initial_cash_micros: i64) -> Self {
        Self { initial_cash_micros, policy: PolicyConfig::conservative_defaults() }
    }
}

/// A closed round-trip: one entry fill paired with the exit fill(s) that
/// flattened it. Scale-out strategies can produce several `TradeResult`s
/// sharing an `entry_price_micros` but different `quantity`/`exit_price`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeResult {
    pub strategy_id: String,
    pub symbol: String,
    pub entry_price_micros: i64,
    pub exit_price_micros: i64,
    pub quantity: i64,
    pub pnl_micros: i64,
}

/// A structured reason a strategy never traded, distinct from a silent
/// zero-trade result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BacktestFailure {
    /// No bars were supplied for a symbol a strategy needed.
    NoData { symbol: String },
    /// The Safety Gate refused an order and the strategy had no fallback.
    StrategyRejected { strategy_id: String, reason: String },
}

impl std::fmt::Display for BacktestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BacktestFailure::NoData { symbol } => write!(f, "no data for symbol {symbol}"),
            BacktestFailure::StrategyRejected { strategy_id, reason } => {
                write!(f, "strategy {strategy_id} rejected: {reason}")
            }
        }
    }
}

/// The full output of a backtest run.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestReport {
    pub equity_curve: Vec<(DateTime<Utc>, i64)>,
    pub fills: Vec<Fill>,
    pub trades: Vec<TradeResult>,
    pub metrics: crate::metrics::Metrics,
    pub failures: Vec<BacktestFailure>,
}
