//! mqk-execution
//!
//! Order model and the Order Router: the single choke-point every outbound
//! order passes through, regardless of whether it is ultimately delivered to
//! a live broker or the historical fill simulator (`mqk-broker-historical`).
//! Deterministic transformations only — business logic belongs in
//! `mqk-strategy` and `mqk-risk`. Prices stay `i64` micros end to end; this
//! system never crosses an f64 wire boundary, since its only broker adapter
//! (`mqk-broker-historical`) is in-process.

mod router;
mod types;

pub use router::{BrokerAdapter, OrderRouter};
pub use types::{
    Order, OrderSnapshot, OrderStatus, OrderType, Quote, RouterError, Side,
};
