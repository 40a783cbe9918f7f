use chrono::{DateTime, Utc};

/// 1e-6 fixed-point scale.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Safety Gate policy configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Maximum resulting position notional (micros) a single symbol may reach.
    pub max_position_notional_micros: i64,
    /// Maximum resulting position quantity (shares) a single symbol may reach.
    pub max_position_qty: i64,
    /// Equity may fall at most this much (micros) below day-start equity.
    pub daily_loss_limit_micros: i64,
    /// If false, orders are evaluated but never actually sent to a live broker
    /// (paper/backtest runs). Kept here, not in the order router, so the gate
    /// itself is the single place that can refuse production traffic.
    pub allow_production: bool,
    /// Width of the duplicate-order detection window.
    pub duplicate_window_seconds: i64,
}

impl PolicyConfig {
    /// Fail-closed defaults for a production engine: tight caps, duplicate
    /// detection on, production submission allowed only once the operator
    /// opts in explicitly by constructing a config that flips the flag.
    pub fn conservative_defaults() -> Self {
        Self {
            max_position_notional_micros: 50_000 * MICROS_SCALE,
            max_position_qty: 10_000,
            daily_loss_limit_micros: 2_000 * MICROS_SCALE,
            allow_production: false,
            duplicate_window_seconds: 5,
        }
    }

    /// Relaxed policy for unit tests exercising one behavior at a time.
    pub fn permissive_for_tests() -> Self {
        Self {
            max_position_notional_micros: i64::MAX,
            max_position_qty: i64::MAX,
            daily_loss_limit_micros: i64::MAX,
            allow_production: true,
            duplicate_window_seconds: 0,
        }
    }
}

/// Side of a proposed order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Order type of a proposed order, for duplicate-window matching.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// An order the evaluator wants to submit, as presented to the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposedOrder {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    /// Estimated notional value of this order (micros), used for the
    /// position-size cap; computed by the caller from quantity and the
    /// best available reference price.
    pub estimated_notional_micros: i64,
    /// `true` if this order would reduce rather than grow
    /// `account.position_qty`'s absolute value.
    pub is_risk_reducing: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Account facts the gate needs, snapshotted by the caller before each
/// evaluation. Live and backtest execution both populate this the same way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub equity_micros: i64,
    pub day_start_equity_micros: i64,
    pub buying_power_micros: i64,
    pub position_qty: i64,
    pub position_notional_micros: i64,
    /// Set by the operator or an upstream kill-switch condition; once true,
    /// every non-reducing order is refused until cleared out-of-band.
    pub kill_switch_engaged: bool,
}

/// PDT rolling-window context fed in by the caller (see [`crate::pdt`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtContext {
    pub pdt_ok: bool,
}

impl PdtContext {
    pub fn ok() -> Self {
        Self { pdt_ok: true }
    }
    pub fn blocked() -> Self {
        Self { pdt_ok: false }
    }
}

/// The fingerprint used to detect accidental resubmission of an equivalent
/// order within the duplicate window: `(symbol, side, quantity, order_type,
/// limit_price, stop_price)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecentOrder {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    pub submitted_at: DateTime<Utc>,
}

impl RecentOrder {
    fn matches(&self, order: &ProposedOrder) -> bool {
        self.symbol == order.symbol
            && self.side == order.side
            && self.order_type == order.order_type
            && self.quantity == order.quantity
            && self.limit_price_micros == order.limit_price_micros
            && self.stop_price_micros == order.stop_price_micros
    }
}

/// Approval evidence returned on success. Opaque to callers beyond the
/// timestamp it was granted at; the Order Router is the only consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalToken {
    pub approved_at: DateTime<Utc>,
}

/// The Safety Gate's refusal taxonomy. Evaluation order is fixed (kill switch,
/// then identity checks, then monetary caps) so the *first* applicable
/// variant is always the one returned, never a later one shadowed by an
/// earlier breach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SafetyError {
    KillSwitchEngaged,
    DuplicateOrder {
        within_seconds: i64,
    },
    PatternDayTradeBlocked,
    PositionSizeExceeded {
        projected_qty: i64,
        max_qty: i64,
        projected_notional_micros: i64,
        max_notional_micros: i64,
    },
    DailyLossLimitExceeded {
        equity_micros: i64,
        floor_micros: i64,
    },
    InsufficientBuyingPower {
        required_micros: i64,
        available_micros: i64,
    },
}

impl std::fmt::Display for SafetyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyError::KillSwitchEngaged => write!(f, "kill switch engaged"),
            SafetyError::DuplicateOrder { within_seconds } => {
                write!(f, "duplicate order within {within_seconds}s window")
            }
            SafetyError::PatternDayTradeBlocked => write!(f, "pattern day trade blocked"),
            SafetyError::PositionSizeExceeded {
                projected_qty,
                max_qty,
                projected_notional_micros,
                max_notional_micros,
            } => write!(
                f,
                "position size exceeded: qty {projected_qty}/{max_qty}, notional {projected_notional_micros}/{max_notional_micros}"
            ),
            SafetyError::DailyLossLimitExceeded {
                equity_micros,
                floor_micros,
            } => write!(
                f,
                "daily loss limit exceeded: equity {equity_micros} <= floor {floor_micros}"
            ),
            SafetyError::InsufficientBuyingPower {
                required_micros,
                available_micros,
            } => write!(
                f,
                "insufficient buying power: required {required_micros}, available {available_micros}"
            ),
        }
    }
}

impl std::error::Error for SafetyError {}

pub(crate) fn find_duplicate<'a>(
    order: &ProposedOrder,
    recent_orders: &'a [RecentOrder],
    window_seconds: i64,
) -> Option<&'a RecentOrder> {
    if window_seconds <= 0 {
        return None;
    }
    recent_orders.iter().find(|r| {
        r.matches(order)
            && (order.submitted_at - r.submitted_at).num_seconds().abs() <= window_seconds
    })
}
