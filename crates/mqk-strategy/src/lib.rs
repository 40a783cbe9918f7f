//! mqk-strategy
//!
//! The strategy phase state machine and its five variant implementations.
//! Every evaluation is a pure function of `(strategy, market_snapshot,
//! order_updates) -> (new_strategy, action)` — no IO, no clock reads, no
//! hidden mutable state. The same evaluator drives both the live engine and
//! the backtest simulator; only the `MarketSnapshot` feeding it differs.

mod evaluator;
mod scheduler;
mod types;
mod variants;

pub use evaluator::{cancel, desync_error, evaluate};
pub use scheduler::{activate_if_due, ActivationEvent};
pub use types::{
    apply_pct_down, apply_pct_up, canonical_variant_name, Action, Bps, GridLevel, MarketSnapshot,
    OcoDesyncError, OrderRequest, OrderUpdate, Phase, RuntimeState, Strategy, VariantParams,
    BPS_SCALE,
};
