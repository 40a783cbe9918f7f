//! mqk-risk
//!
//! The Safety Gate: a pure policy function every outbound order traverses,
//! in both live and backtest execution, plus the FINRA Pattern Day Trader
//! accounting that feeds it. Deterministic logic only — no IO, no clock
//! reads, no broker calls.

mod engine;
mod types;

pub mod pdt;

pub use engine::evaluate;
pub use types::{
    AccountState, ApprovalToken, OrderType, PdtContext, PolicyConfig, ProposedOrder, RecentOrder,
    SafetyError, Side, MICROS_SCALE,
};
