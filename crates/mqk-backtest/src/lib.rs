//! mqk-backtest
//!
//! The Backtest Simulator: replays OHLC bars through the same evaluator,
//! Safety Gate, and Order Router the live engine uses, via a Historical
//! Broker fill model instead of a live venue connection.

mod bars;
mod driver;
mod metrics;
pub mod types;

pub use bars::{load_bars_csv, BarLoadError};
pub use driver::BacktestEngine;
pub use metrics::Metrics;
pub use types::{BacktestBar, BacktestConfig, BacktestFailure, BacktestReport, TradeResult};
