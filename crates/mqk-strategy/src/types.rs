use chrono::{DateTime, Utc};

use mqk_execution::{OrderType, Side};

/// Basis points: `10_000` = 100%. Percentages throughout this crate are
/// carried as `i64` basis points rather than `f64` fractions, matching the
/// integer-micros pricing discipline the rest of the execution surface uses —
/// a trailing percentage compared as a float could drift a watermark test by
/// fractions of a cent across thousands of bars.
pub type Bps = i64;

pub const BPS_SCALE: i64 = 10_000;

/// `price * (1 - bps/10_000)`, rounded down, using i128 to avoid overflow.
pub fn apply_pct_down(price_micros: i64, bps: Bps) -> i64 {
    ((price_micros as i128) * ((BPS_SCALE - bps) as i128) / (BPS_SCALE as i128)) as i64
}

/// `price * (1 + bps/10_000)`, rounded down, using i128 to avoid overflow.
pub fn apply_pct_up(price_micros: i64, bps: Bps) -> i64 {
    ((price_micros as i128) * ((BPS_SCALE + bps) as i128) / (BPS_SCALE as i128)) as i64
}

/// High-level lifecycle state of a strategy. Advances monotonically through
/// the skeleton below; `Cancelled` is reachable from any non-terminal phase.
///
/// `pending -> entry_active -> position_open -> exiting -> completed`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Pending,
    EntryActive,
    PositionOpen,
    Exiting,
    Completed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled)
    }
}

/// Variant-specific configuration. The variant itself is this enum's tag —
/// there is no separate `variant` discriminant to keep in sync with it;
/// [`VariantParams::name`] produces the canonical wire name.
#[derive(Clone, Debug, PartialEq)]
pub enum VariantParams {
    TrailingStop {
        trailing_bps: Bps,
    },
    Bracket {
        tp_bps: Bps,
        sl_bps: Bps,
    },
    ScaleOut {
        /// Rungs as basis points above entry, strictly ascending.
        rungs_bps: Vec<Bps>,
        /// Fractions of `quantity` per rung, in basis points, summing to
        /// `BPS_SCALE`; rounding residue is folded into the last rung.
        fractions_bps: Vec<Bps>,
    },
    Grid {
        reference_price_micros: i64,
        spacing_bps: Bps,
        levels: u32,
    },
    PullbackTrailing {
        pullback_bps: Bps,
        trailing_bps: Bps,
    },
}

impl VariantParams {
    pub fn name(&self) -> &'static str {
        match self {
            VariantParams::TrailingStop { .. } => "trailing_stop",
            VariantParams::Bracket { .. } => "bracket",
            VariantParams::ScaleOut { .. } => "scale_out",
            VariantParams::Grid { .. } => "grid",
            VariantParams::PullbackTrailing { .. } => "pullback_trailing",
        }
    }
}

/// One grid rung: a price level and which side currently rests there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridLevel {
    pub price_micros: i64,
    pub side: Side,
    pub order_client_id: Option<String>,
    pub filled: bool,
}

/// Variant-specific data carried between evaluation steps. Empty for a
/// strategy that hasn't entered yet (except pullback-trailing, which tracks
/// a pre-entry watermark here too).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RuntimeState {
    pub entry_fill_price_micros: Option<i64>,
    pub high_watermark_micros: Option<i64>,
    pub entry_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub oco_peer_cancel_attempts: u32,
    pub oco_desync: bool,
    /// Client id of whichever bracket leg filled first, once known; drives
    /// which peer we're trying to cancel during `exiting`.
    pub oco_filled_leg_id: Option<String>,
    pub rung_order_ids: Vec<Option<String>>,
    pub rungs_filled: Vec<bool>,
    pub grid_levels: Vec<GridLevel>,
    /// Levels that filled last step and are due a flipped-side refill this
    /// step, one tick delayed to avoid immediate re-trigger chatter.
    pub grid_refill_due: Vec<bool>,
    /// Pre-entry observed high for pullback-trailing; distinct from
    /// `high_watermark_micros`, which only starts once the position is open.
    pub pre_entry_high_micros: Option<i64>,
}

/// The central aggregate. The evaluator never mutates this in place — it
/// returns a new value plus the action to take, and the caller commits both
/// atomically.
#[derive(Clone, Debug, PartialEq)]
pub struct Strategy {
    pub id: String,
    pub symbol: String,
    pub quantity: i64,
    pub entry_price_micros: Option<i64>,
    pub variant_params: VariantParams,
    pub phase: Phase,
    pub enabled: bool,
    pub schedule_at: Option<DateTime<Utc>>,
    pub schedule_enabled: bool,
    pub runtime_state: RuntimeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn variant_name(&self) -> &'static str {
        self.variant_params.name()
    }

    /// `enabled && !schedule_pending(now)`, the scheduler's activity predicate.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.schedule_pending(now)
    }

    pub fn schedule_pending(&self, now: DateTime<Utc>) -> bool {
        self.schedule_enabled && self.schedule_at.map(|at| at > now).unwrap_or(false)
    }
}

/// A fresh market observation fed to the evaluator each step. In live
/// execution `bar_high`/`bar_low` are `None` (no bar exists yet); in backtest
/// they carry the current bar's high/low so trailing watermarks can be
/// updated the same way §4.5 requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_micros: i64,
    pub bar_high_micros: Option<i64>,
    pub bar_low_micros: Option<i64>,
    pub ts_utc: DateTime<Utc>,
}

impl MarketSnapshot {
    /// The price to fold into a high-watermark: the bar's high if known,
    /// otherwise the last trade price.
    pub fn watermark_candidate(&self) -> i64 {
        self.bar_high_micros.unwrap_or(self.last_micros)
    }
}

/// A fill/ack update for an order previously emitted by this strategy,
/// supplied by the engine after it polls the Order Router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderUpdate {
    pub client_id: String,
    pub status: mqk_execution::OrderStatus,
    pub filled_qty: i64,
    pub avg_fill_price_micros: i64,
}

/// A new order the evaluator wants the engine to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderRequest {
    pub client_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    pub quantity: i64,
    pub oco_peer_id: Option<String>,
}

/// The single action the evaluator may emit per step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    NoOp,
    Submit(OrderRequest),
    Cancel { client_id: String },
}

/// Invariant violation surfaced when bracket OCO management cannot keep the
/// pair in sync after exhausting the bounded cancel-retry budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcoDesyncError {
    pub strategy_id: String,
    pub filled_leg: String,
    pub stuck_leg: String,
}

impl std::fmt::Display for OcoDesyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "oco desync on strategy {}: {} filled but {} would not cancel",
            self.strategy_id, self.filled_leg, self.stuck_leg
        )
    }
}

impl std::error::Error for OcoDesyncError {}

/// Canonicalize a variant name accepted on read (hyphenated or snake_case)
/// to the canonical snake_case form written back to storage. The single
/// explicit canonicalizer for variant aliases.
pub fn canonical_variant_name(raw: &str) -> Option<&'static str> {
    match raw.replace('-', "_").as_str() {
        "trailing_stop" => Some("trailing_stop"),
        "bracket" => Some("bracket"),
        "scale_out" => Some("scale_out"),
        "grid" => Some("grid"),
        "pullback_trailing" => Some("pullback_trailing"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_pct_down_five_percent() {
        assert_eq!(apply_pct_down(120_000_000, 500), 114_000_000);
    }

    #[test]
    fn apply_pct_up_ten_percent() {
        assert_eq!(apply_pct_up(100_000_000, 1_000), 110_000_000);
    }

    #[test]
    fn canonicalizes_hyphenated_aliases() {
        assert_eq!(canonical_variant_name("trailing-stop"), Some("trailing_stop"));
        assert_eq!(canonical_variant_name("pullback-trailing"), Some("pullback_trailing"));
        assert_eq!(canonical_variant_name("unknown-variant"), None);
    }
}
