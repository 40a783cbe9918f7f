//! mqk-broker-historical
//!
//! The historical fill simulator: resolves resting orders against OHLC bars
//! deterministically, in the fixed intra-bar order {stop trigger, limit
//! fill, market fill, trailing update}. Implements the same `BrokerAdapter`
//! trait as a live broker so `mqk-execution::OrderRouter` can wrap either
//! one interchangeably.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mqk_execution::{BrokerAdapter, Order, OrderSnapshot, OrderStatus, OrderType, Quote, RouterError, Side};

const BPS_SCALE: i64 = 10_000;

fn apply_pct_down(price_micros: i64, bps: i64) -> i64 {
    ((price_micros as i128) * ((BPS_SCALE - bps) as i128) / (BPS_SCALE as i128)) as i64
}

fn apply_pct_up(price_micros: i64, bps: i64) -> i64 {
    ((price_micros as i128) * ((BPS_SCALE + bps) as i128) / (BPS_SCALE as i128)) as i64
}

/// One OHLC bar for a symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bar {
    pub symbol: String,
    pub ts_utc: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
}

/// Resting-order book and fill simulator for one backtest run. Orders from
/// `submit` rest here until a subsequent `advance_bar` call fills or the
/// caller cancels them; nothing resolves at submission time.
#[derive(Default)]
pub struct HistoricalBroker {
    resting: BTreeMap<String, Order>,
    last_price: BTreeMap<String, i64>,
}

impl HistoricalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances every resting order for `bar.symbol` by one bar. Returns a
    /// snapshot for every order whose status changed (filled). Stop orders
    /// are resolved before limit orders before market orders before trailing
    /// orders — the fixed order means a bar that would trigger both legs of
    /// a bracket (a gap through both levels) always resolves the stop leg
    /// first, the conservative outcome.
    pub fn advance_bar(&mut self, bar: &Bar) -> Vec<OrderSnapshot> {
        self.last_price.insert(bar.symbol.clone(), bar.close_micros);

        let ids: Vec<String> = self
            .resting
            .iter()
            .filter(|(_, o)| o.symbol == bar.symbol && !o.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        let mut updates = Vec::new();

        for id in &ids {
            self.try_fill(id, bar, OrderType::Stop, &mut updates, fill_stop);
        }
        for id in &ids {
            self.try_fill(id, bar, OrderType::Limit, &mut updates, fill_limit);
        }
        for id in &ids {
            self.try_fill(id, bar, OrderType::Market, &mut updates, |_, bar| Some(bar.close_micros));
        }
        for id in &ids {
            self.advance_trailing(id, bar, &mut updates);
        }

        updates
    }

    fn try_fill(
        &mut self,
        id: &str,
        bar: &Bar,
        want_type: OrderType,
        updates: &mut Vec<OrderSnapshot>,
        rule: impl Fn(&Order, &Bar) -> Option<i64>,
    ) {
        let Some(order) = self.resting.get(id) else { return };
        if order.order_type != want_type || order.is_terminal() {
            return;
        }
        if let Some(fill_price) = rule(order, bar) {
            self.fill(id, fill_price, bar.ts_utc, updates);
        }
    }

    fn advance_trailing(&mut self, id: &str, bar: &Bar, updates: &mut Vec<OrderSnapshot>) {
        let Some(order) = self.resting.get(id) else { return };
        if order.order_type != OrderType::TrailingStop || order.is_terminal() {
            return;
        }
        let bps = order.trailing_bps.unwrap_or(0);
        let previous_watermark = order.stop_price_micros.unwrap_or(match order.side {
            Side::Sell => bar.high_micros,
            Side::Buy => bar.low_micros,
        });

        let (new_watermark, fill_price) = match order.side {
            Side::Sell => {
                let w = previous_watermark.max(bar.high_micros);
                let trigger = apply_pct_down(w, bps);
                let fill = (bar.low_micros <= trigger).then(|| trigger.min(bar.open_micros));
                (w, fill)
            }
            Side::Buy => {
                let w = previous_watermark.min(bar.low_micros);
                let trigger = apply_pct_up(w, bps);
                let fill = (bar.high_micros >= trigger).then(|| trigger.max(bar.open_micros));
                (w, fill)
            }
        };

        if let Some(fill_price) = fill_price {
            self.fill(id, fill_price, bar.ts_utc, updates);
        } else if let Some(order) = self.resting.get_mut(id) {
            order.stop_price_micros = Some(new_watermark);
            order.updated_at = bar.ts_utc;
        }
    }

    /// Fills `id` and, if it carries an `oco_peer_id`, cancels the still-live
    /// peer in the same pass. Without this a bracket's TP and SL can both
    /// cross on one gapping bar before the evaluator gets a chance to react.
    fn fill(&mut self, id: &str, price_micros: i64, ts: DateTime<Utc>, updates: &mut Vec<OrderSnapshot>) {
        let order = self.resting.get_mut(id).expect("id came from a live resting scan");
        order.status = OrderStatus::Filled;
        order.filled_qty = order.quantity;
        order.avg_fill_price_micros = price_micros;
        order.updated_at = ts;
        let snapshot = order.clone();
        let peer_id = snapshot.oco_peer_id.clone();
        updates.push(snapshot);

        if let Some(peer_id) = peer_id {
            if let Some(peer) = self.resting.get_mut(&peer_id) {
                if !peer.is_terminal() {
                    peer.status = OrderStatus::Cancelled;
                    peer.updated_at = ts;
                    updates.push(peer.clone());
                }
            }
        }
    }
}

fn fill_stop(order: &Order, bar: &Bar) -> Option<i64> {
    let stop = order.stop_price_micros?;
    match order.side {
        Side::Sell => (bar.low_micros <= stop).then(|| stop.min(bar.open_micros)),
        Side::Buy => (bar.high_micros >= stop).then(|| stop.max(bar.open_micros)),
    }
}

fn fill_limit(order: &Order, bar: &Bar) -> Option<i64> {
    let limit = order.limit_price_micros?;
    match order.side {
        Side::Buy => (bar.low_micros <= limit).then(|| limit.min(bar.open_micros)),
        Side::Sell => (bar.high_micros >= limit).then(|| limit.max(bar.open_micros)),
    }
}

impl BrokerAdapter for HistoricalBroker {
    fn submit(&mut self, mut order: Order) -> Result<OrderSnapshot, RouterError> {
        order.status = OrderStatus::Accepted;
        order.broker_id = Some(format!("hist-{}", order.client_id));

        // The first OCO leg placed can't yet name a peer that doesn't exist.
        // Backfill the link the other way so either leg's fill cancels the
        // other regardless of placement order.
        if let Some(peer_id) = &order.oco_peer_id {
            if let Some(peer) = self.resting.get_mut(peer_id) {
                if peer.oco_peer_id.is_none() {
                    peer.oco_peer_id = Some(order.client_id.clone());
                }
            }
        }

        self.resting.insert(order.client_id.clone(), order.clone());
        Ok(order)
    }

    fn cancel(&mut self, client_id: &str) -> Result<OrderSnapshot, RouterError> {
        let order = self
            .resting
            .get_mut(client_id)
            .ok_or_else(|| RouterError::UnknownOrder { client_id: client_id.to_string() })?;
        if !order.is_terminal() {
            order.status = OrderStatus::Cancelled;
        }
        Ok(order.clone())
    }

    fn status(&self, client_id: &str) -> Result<OrderSnapshot, RouterError> {
        self.resting
            .get(client_id)
            .cloned()
            .ok_or_else(|| RouterError::UnknownOrder { client_id: client_id.to_string() })
    }

    fn quote(&self, symbol: &str) -> Result<Quote, RouterError> {
        let last = *self
            .last_price
            .get(symbol)
            .ok_or_else(|| RouterError::Permanent(format!("no bars seen yet for {symbol}")))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            bid_micros: last,
            ask_micros: last,
            last_micros: last,
            ts_utc: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_execution::OrderType;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn order(client_id: &str, side: Side, order_type: OrderType) -> Order {
        Order {
            client_id: client_id.to_string(),
            broker_id: None,
            symbol: "AAPL".to_string(),
            side,
            order_type,
            limit_price_micros: None,
            stop_price_micros: None,
            trailing_bps: None,
            quantity: 10,
            status: OrderStatus::Pending,
            filled_qty: 0,
            avg_fill_price_micros: 0,
            created_at: now(),
            updated_at: now(),
            parent_strategy_id: "s1".to_string(),
            oco_peer_id: None,
        }
    }

    fn bar(o: i64, h: i64, l: i64, c: i64) -> Bar {
        Bar { symbol: "AAPL".to_string(), ts_utc: now(), open_micros: o, high_micros: h, low_micros: l, close_micros: c }
    }

    const M: i64 = 1_000_000;

    #[test]
    fn limit_sell_fills_when_bar_high_crosses_level() {
        let mut broker = HistoricalBroker::new();
        let mut o = order("tp", Side::Sell, OrderType::Limit);
        o.limit_price_micros = Some(110 * M);
        broker.submit(o).unwrap();

        let updates = broker.advance_bar(&bar(98 * M, 112 * M, 97 * M, 111 * M));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].avg_fill_price_micros, 110 * M);
        assert_eq!(updates[0].status, OrderStatus::Filled);
    }

    #[test]
    fn stop_sell_resolves_before_limit_sell_on_same_bar() {
        let mut broker = HistoricalBroker::new();
        let mut tp = order("tp", Side::Sell, OrderType::Limit);
        tp.limit_price_micros = Some(110 * M);
        let mut sl = order("sl", Side::Sell, OrderType::Stop);
        sl.stop_price_micros = Some(95 * M);
        sl.oco_peer_id = Some("tp".to_string());
        broker.submit(tp).unwrap();
        broker.submit(sl).unwrap();

        // Gap-down bar crosses both TP and SL in the same bar. The stop leg
        // resolves first and its OCO link cancels the limit leg before the
        // limit pass ever looks at it.
        let updates = broker.advance_bar(&bar(90 * M, 112 * M, 90 * M, 91 * M));
        assert_eq!(updates.len(), 2, "stop fill and its OCO-linked cancel of the limit leg");
        assert_eq!(updates[0].client_id, "sl", "stop orders resolve before limit orders");
        assert_eq!(updates[0].status, OrderStatus::Filled);
        assert_eq!(updates[1].client_id, "tp");
        assert_eq!(updates[1].status, OrderStatus::Cancelled);
    }

    #[test]
    fn trailing_stop_sell_tracks_watermark_and_fires_on_pullback() {
        let mut broker = HistoricalBroker::new();
        let mut o = order("ts", Side::Sell, OrderType::TrailingStop);
        o.stop_price_micros = Some(100 * M);
        o.trailing_bps = Some(500);
        broker.submit(o).unwrap();

        let u1 = broker.advance_bar(&bar(110 * M, 110 * M, 110 * M, 110 * M));
        assert!(u1.is_empty());
        let u2 = broker.advance_bar(&bar(120 * M, 120 * M, 120 * M, 120 * M));
        assert!(u2.is_empty());
        let u3 = broker.advance_bar(&bar(110 * M, 110 * M, 110 * M, 110 * M));
        assert_eq!(u3.len(), 1);
        assert_eq!(u3[0].avg_fill_price_micros, 110 * M);
    }

    #[test]
    fn market_order_fills_at_close() {
        let mut broker = HistoricalBroker::new();
        broker.submit(order("m1", Side::Buy, OrderType::Market)).unwrap();
        let updates = broker.advance_bar(&bar(100 * M, 105 * M, 99 * M, 103 * M));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].avg_fill_price_micros, 103 * M);
    }
}
