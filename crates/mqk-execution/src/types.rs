use chrono::{DateTime, Utc};

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// The three order types the fill simulator and live broker adapters need to
/// understand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    /// Stop level tracks a watermark rather than a fixed price; carried
    /// separately from `Stop` because its trigger recomputes every bar.
    TrailingStop,
}

/// Lifecycle status of an order, advanced only by the broker adapter (live or
/// historical) that owns it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Accepted,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

/// An outgoing instruction, identified by a stable client-side id until the
/// broker assigns its own.
///
/// Invariants: `filled_qty <= quantity`; a `Filled` order has
/// `filled_qty == quantity`; an order carrying `oco_peer_id` transitions to
/// `Cancelled` as soon as its peer reaches `Filled`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub client_id: String,
    pub broker_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    /// `TrailingStop` only: the trailing distance in basis points.
    /// `stop_price_micros` doubles as the running watermark for this order
    /// type and is updated by the broker adapter on every bar/tick.
    pub trailing_bps: Option<i64>,
    pub quantity: i64,
    pub status: OrderStatus,
    pub filled_qty: i64,
    pub avg_fill_price_micros: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_strategy_id: String,
    pub oco_peer_id: Option<String>,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Filled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// A point-in-time view of an order returned by `status`/`submit`/`cancel`.
pub type OrderSnapshot = Order;

/// A bid/ask/last quote for a symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quote {
    pub symbol: String,
    pub bid_micros: i64,
    pub ask_micros: i64,
    pub last_micros: i64,
    pub ts_utc: DateTime<Utc>,
}

/// Router / broker adapter error taxonomy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouterError {
    /// Network, 5xx, throttling — caller may retry with backoff.
    Transient(String),
    /// Auth failure, order outright rejected by the venue — do not retry.
    Permanent(String),
    /// `status`/`cancel` referenced a `client_id` the router has never seen.
    UnknownOrder { client_id: String },
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::Transient(msg) => write!(f, "transient broker error: {msg}"),
            RouterError::Permanent(msg) => write!(f, "permanent broker error: {msg}"),
            RouterError::UnknownOrder { client_id } => {
                write!(f, "unknown order: {client_id}")
            }
        }
    }
}

impl std::error::Error for RouterError {}
