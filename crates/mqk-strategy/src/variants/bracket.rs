use mqk_execution::{OrderStatus, OrderType, Side};

use crate::types::{apply_pct_down, apply_pct_up, Action, MarketSnapshot, OcoDesyncError, OrderRequest, OrderUpdate, Phase, Strategy, VariantParams};

const MAX_OCO_CANCEL_ATTEMPTS: u32 = 3;

fn bps(strategy: &Strategy) -> (i64, i64) {
    match strategy.variant_params {
        VariantParams::Bracket { tp_bps, sl_bps } => (tp_bps, sl_bps),
        _ => unreachable!("dispatched only for bracket"),
    }
}

fn id(strategy: &Strategy, leg: &str) -> String {
    format!("{}-{}", strategy.id, leg)
}

fn filled(updates: &[OrderUpdate], client_id: &str) -> Option<&OrderUpdate> {
    updates.iter().find(|u| u.client_id == client_id && u.status == OrderStatus::Filled)
}

fn cancelled(updates: &[OrderUpdate], client_id: &str) -> bool {
    updates.iter().any(|u| u.client_id == client_id && u.status == OrderStatus::Cancelled)
}

/// Entry fills, then the take-profit and stop-loss legs are placed
/// sequentially — one order per evaluation step — so a TP ack is always
/// observed before the SL leg exists. Once either leg fills, the peer is
/// cancelled with a bounded retry budget; exhausting it sets
/// `runtime_state.oco_desync` and freezes the strategy in `exiting` rather
/// than guessing at a resolution.
pub fn evaluate(strategy: &Strategy, market: &MarketSnapshot, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let mut next = strategy.clone();
    next.updated_at = market.ts_utc;

    match strategy.phase {
        Phase::Pending => {
            let client_id = id(strategy, "entry");
            next.phase = Phase::EntryActive;
            next.runtime_state.entry_order_id = Some(client_id.clone());
            let order_type = if strategy.entry_price_micros.is_some() { OrderType::Limit } else { OrderType::Market };
            let order = OrderRequest {
                client_id,
                symbol: strategy.symbol.clone(),
                side: Side::Buy,
                order_type,
                limit_price_micros: strategy.entry_price_micros,
                stop_price_micros: None,
                quantity: strategy.quantity,
                oco_peer_id: None,
            };
            (next, Action::Submit(order))
        }
        Phase::EntryActive => {
            let Some(entry_id) = strategy.runtime_state.entry_order_id.clone() else {
                return (next, Action::NoOp);
            };
            match filled(updates, &entry_id) {
                Some(fill) => {
                    next.phase = Phase::PositionOpen;
                    next.runtime_state.entry_fill_price_micros = Some(fill.avg_fill_price_micros);
                    next.runtime_state.entry_order_id = None;
                    (next, Action::NoOp)
                }
                None => (next, Action::NoOp),
            }
        }
        Phase::PositionOpen => evaluate_position_open(strategy, &mut next, updates),
        Phase::Exiting => evaluate_exiting(strategy, &mut next, updates),
        Phase::Completed | Phase::Cancelled => (next, Action::NoOp),
    }
}

fn evaluate_position_open(strategy: &Strategy, next: &mut Strategy, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let (tp_bps, sl_bps) = bps(strategy);
    let entry = strategy.runtime_state.entry_fill_price_micros.expect("position_open implies entry filled");

    if strategy.runtime_state.tp_order_id.is_none() {
        let client_id = id(strategy, "tp");
        next.runtime_state.tp_order_id = Some(client_id.clone());
        let order = OrderRequest {
            client_id,
            symbol: strategy.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            limit_price_micros: Some(apply_pct_up(entry, tp_bps)),
            stop_price_micros: None,
            quantity: strategy.quantity,
            oco_peer_id: None,
        };
        return (next.clone(), Action::Submit(order));
    }

    if strategy.runtime_state.sl_order_id.is_none() {
        let client_id = id(strategy, "sl");
        next.runtime_state.sl_order_id = Some(client_id.clone());
        let order = OrderRequest {
            client_id,
            symbol: strategy.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::Stop,
            limit_price_micros: None,
            stop_price_micros: Some(apply_pct_down(entry, sl_bps)),
            quantity: strategy.quantity,
            oco_peer_id: strategy.runtime_state.tp_order_id.clone(),
        };
        return (next.clone(), Action::Submit(order));
    }

    let tp_id = strategy.runtime_state.tp_order_id.clone().unwrap();
    let sl_id = strategy.runtime_state.sl_order_id.clone().unwrap();

    if filled(updates, &tp_id).is_some() {
        next.phase = Phase::Exiting;
        next.runtime_state.oco_filled_leg_id = Some(tp_id);
        next.runtime_state.oco_peer_cancel_attempts = 1;
        return (next.clone(), Action::Cancel { client_id: sl_id });
    }
    if filled(updates, &sl_id).is_some() {
        next.phase = Phase::Exiting;
        next.runtime_state.oco_filled_leg_id = Some(sl_id);
        next.runtime_state.oco_peer_cancel_attempts = 1;
        return (next.clone(), Action::Cancel { client_id: tp_id });
    }

    (next.clone(), Action::NoOp)
}

fn evaluate_exiting(strategy: &Strategy, next: &mut Strategy, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let Some(filled_leg) = strategy.runtime_state.oco_filled_leg_id.clone() else {
        next.phase = Phase::Completed;
        return (next.clone(), Action::NoOp);
    };
    let tp_id = strategy.runtime_state.tp_order_id.clone().unwrap_or_default();
    let sl_id = strategy.runtime_state.sl_order_id.clone().unwrap_or_default();
    let stuck_leg = if filled_leg == tp_id { sl_id } else { tp_id };

    if cancelled(updates, &stuck_leg) {
        next.phase = Phase::Completed;
        return (next.clone(), Action::NoOp);
    }
    if strategy.runtime_state.oco_peer_cancel_attempts >= MAX_OCO_CANCEL_ATTEMPTS {
        next.runtime_state.oco_desync = true;
        return (next.clone(), Action::NoOp);
    }
    next.runtime_state.oco_peer_cancel_attempts += 1;
    (next.clone(), Action::Cancel { client_id: stuck_leg })
}

/// Surfaces the desync as a structured error for the caller to audit, once.
pub fn desync_error(strategy: &Strategy) -> Option<OcoDesyncError> {
    if !strategy.runtime_state.oco_desync {
        return None;
    }
    let filled_leg = strategy.runtime_state.oco_filled_leg_id.clone().unwrap_or_default();
    let tp_id = strategy.runtime_state.tp_order_id.clone().unwrap_or_default();
    let sl_id = strategy.runtime_state.sl_order_id.clone().unwrap_or_default();
    let stuck_leg = if filled_leg == tp_id { sl_id } else { tp_id };
    Some(OcoDesyncError {
        strategy_id: strategy.id.clone(),
        filled_leg,
        stuck_leg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuntimeState;
    use chrono::{DateTime, Utc};

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn base_strategy(phase: Phase, runtime_state: RuntimeState) -> Strategy {
        let t0 = t("2026-01-01T00:00:00Z");
        Strategy {
            id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 10,
            entry_price_micros: None,
            variant_params: VariantParams::Bracket { tp_bps: 1_000, sl_bps: 500 },
            phase,
            enabled: true,
            schedule_at: None,
            schedule_enabled: false,
            runtime_state,
            created_at: t0,
            updated_at: t0,
        }
    }

    fn snap(price: i64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "AAPL".to_string(),
            last_micros: price,
            bar_high_micros: Some(price),
            bar_low_micros: Some(price),
            ts_utc: t("2026-01-01T00:01:00Z"),
        }
    }

    #[test]
    fn places_tp_then_sl_sequentially() {
        const M: i64 = 1_000_000;
        let mut rs = RuntimeState::default();
        rs.entry_fill_price_micros = Some(100 * M);
        let strat = base_strategy(Phase::PositionOpen, rs);

        let (next1, action1) = evaluate(&strat, &snap(100 * M), &[]);
        assert!(matches!(action1, Action::Submit(_)));
        assert!(next1.runtime_state.tp_order_id.is_some());
        assert!(next1.runtime_state.sl_order_id.is_none());

        let (next2, action2) = evaluate(&next1, &snap(100 * M), &[]);
        assert!(matches!(action2, Action::Submit(_)));
        assert!(next2.runtime_state.sl_order_id.is_some());
    }

    #[test]
    fn tp_fill_cancels_sl_and_completes() {
        const M: i64 = 1_000_000;
        let mut rs = RuntimeState::default();
        rs.entry_fill_price_micros = Some(100 * M);
        rs.tp_order_id = Some("s1-tp".to_string());
        rs.sl_order_id = Some("s1-sl".to_string());
        let strat = base_strategy(Phase::PositionOpen, rs);

        let fills = vec![OrderUpdate {
            client_id: "s1-tp".to_string(),
            status: OrderStatus::Filled,
            filled_qty: 10,
            avg_fill_price_micros: 110 * M,
        }];
        let (next, action) = evaluate(&strat, &snap(110 * M), &fills);
        assert_eq!(next.phase, Phase::Exiting);
        assert_eq!(action, Action::Cancel { client_id: "s1-sl".to_string() });

        let cancel_ack = vec![OrderUpdate {
            client_id: "s1-sl".to_string(),
            status: OrderStatus::Cancelled,
            filled_qty: 0,
            avg_fill_price_micros: 0,
        }];
        let (next2, action2) = evaluate(&next, &snap(110 * M), &cancel_ack);
        assert_eq!(next2.phase, Phase::Completed);
        assert_eq!(action2, Action::NoOp);
        assert!(!next2.runtime_state.oco_desync);
    }

    #[test]
    fn exhausted_cancel_retries_flag_desync() {
        const M: i64 = 1_000_000;
        let mut rs = RuntimeState::default();
        rs.entry_fill_price_micros = Some(100 * M);
        rs.tp_order_id = Some("s1-tp".to_string());
        rs.sl_order_id = Some("s1-sl".to_string());
        rs.oco_filled_leg_id = Some("s1-tp".to_string());
        rs.oco_peer_cancel_attempts = MAX_OCO_CANCEL_ATTEMPTS;
        let mut strat = base_strategy(Phase::Exiting, rs);

        let (next, action) = evaluate(&strat, &snap(110 * M), &[]);
        assert!(next.runtime_state.oco_desync);
        assert_eq!(action, Action::NoOp);
        strat = next;
        assert!(desync_error(&strat).is_some());
    }
}
