use mqk_execution::{OrderStatus, OrderType, Side};

use crate::types::{apply_pct_down, apply_pct_up, Action, GridLevel, MarketSnapshot, OrderRequest, OrderUpdate, Phase, Strategy, VariantParams};

fn params(strategy: &Strategy) -> (i64, i64, u32) {
    match strategy.variant_params {
        VariantParams::Grid { reference_price_micros, spacing_bps, levels } => (reference_price_micros, spacing_bps, levels),
        _ => unreachable!("dispatched only for grid"),
    }
}

fn id(strategy: &Strategy, leg: &str) -> String {
    format!("{}-{}", strategy.id, leg)
}

/// Builds the symmetric ladder: `levels` rungs below `reference_price_micros`
/// resting as buys, `levels` above resting as sells, spaced geometrically by
/// `spacing_bps` per rung.
fn build_levels(reference_price_micros: i64, spacing_bps: i64, levels: u32) -> Vec<GridLevel> {
    let mut out = Vec::with_capacity(levels as usize * 2);
    let mut price = reference_price_micros;
    for _ in 0..levels {
        price = apply_pct_down(price, spacing_bps);
        out.push(GridLevel { price_micros: price, side: Side::Buy, order_client_id: None, filled: false });
    }
    let mut price = reference_price_micros;
    for _ in 0..levels {
        price = apply_pct_up(price, spacing_bps);
        out.push(GridLevel { price_micros: price, side: Side::Sell, order_client_id: None, filled: false });
    }
    out
}

fn flip(side: Side) -> Side {
    match side {
        Side::Buy => Side::Sell,
        Side::Sell => Side::Buy,
    }
}

/// The grid has no terminal phase under normal operation — it keeps rungs
/// resting and refilling until externally cancelled. Each evaluation step
/// emits at most one action: first priority is placing any unarmed level,
/// second is the one-tick-delayed flipped-side refill of a level that filled
/// last step (per the resolved symmetric-refill question).
pub fn evaluate(strategy: &Strategy, market: &MarketSnapshot, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let mut next = strategy.clone();
    next.updated_at = market.ts_utc;

    if strategy.phase == Phase::Pending {
        let (reference, spacing, levels) = params(strategy);
        next.phase = Phase::PositionOpen;
        next.runtime_state.grid_levels = build_levels(reference, spacing, levels);
        next.runtime_state.grid_refill_due = vec![false; next.runtime_state.grid_levels.len()];
        return (next, Action::NoOp);
    }

    if !matches!(strategy.phase, Phase::PositionOpen) {
        return (next, Action::NoOp);
    }

    // Priority 1: detect fills from last step's resting orders.
    for (i, level) in strategy.runtime_state.grid_levels.iter().enumerate() {
        if level.filled {
            continue;
        }
        let Some(client_id) = &level.order_client_id else { continue };
        if updates.iter().any(|u| &u.client_id == client_id && u.status == OrderStatus::Filled) {
            next.runtime_state.grid_levels[i].filled = true;
            next.runtime_state.grid_levels[i].order_client_id = None;
            next.runtime_state.grid_refill_due[i] = true;
            return (next, Action::NoOp);
        }
    }

    // Priority 2: one-tick-delayed flipped refill for a level that filled.
    for i in 0..strategy.runtime_state.grid_levels.len() {
        if !strategy.runtime_state.grid_refill_due[i] {
            continue;
        }
        let level = &strategy.runtime_state.grid_levels[i];
        let new_side = flip(level.side);
        let client_id = id(strategy, &format!("lvl{i}-refill"));
        next.runtime_state.grid_levels[i].side = new_side;
        next.runtime_state.grid_levels[i].filled = false;
        next.runtime_state.grid_levels[i].order_client_id = Some(client_id.clone());
        next.runtime_state.grid_refill_due[i] = false;
        let order = OrderRequest {
            client_id,
            symbol: strategy.symbol.clone(),
            side: new_side,
            order_type: OrderType::Limit,
            limit_price_micros: Some(level.price_micros),
            stop_price_micros: None,
            quantity: strategy.quantity,
            oco_peer_id: None,
        };
        return (next, Action::Submit(order));
    }

    // Priority 3: place any never-yet-armed level.
    for (i, level) in strategy.runtime_state.grid_levels.iter().enumerate() {
        if level.order_client_id.is_some() || level.filled {
            continue;
        }
        let client_id = id(strategy, &format!("lvl{i}"));
        next.runtime_state.grid_levels[i].order_client_id = Some(client_id.clone());
        let order = OrderRequest {
            client_id,
            symbol: strategy.symbol.clone(),
            side: level.side,
            order_type: OrderType::Limit,
            limit_price_micros: Some(level.price_micros),
            stop_price_micros: None,
            quantity: strategy.quantity,
            oco_peer_id: None,
        };
        return (next, Action::Submit(order));
    }

    (next, Action::NoOp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuntimeState;
    use chrono::{DateTime, Utc};

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
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

    fn strat() -> Strategy {
        Strategy {
            id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 1,
            entry_price_micros: None,
            variant_params: VariantParams::Grid { reference_price_micros: 100_000_000, spacing_bps: 1_000, levels: 2 },
            phase: Phase::Pending,
            enabled: true,
            schedule_at: None,
            schedule_enabled: false,
            runtime_state: RuntimeState::default(),
            created_at: t("2026-01-01T00:00:00Z"),
            updated_at: t("2026-01-01T00:00:00Z"),
        }
    }

    #[test]
    fn builds_symmetric_ladder_around_reference() {
        let (next, _) = evaluate(&strat(), &snap(100_000_000), &[]);
        assert_eq!(next.phase, Phase::PositionOpen);
        assert_eq!(next.runtime_state.grid_levels.len(), 4);
        let buys: Vec<_> = next.runtime_state.grid_levels.iter().filter(|l| l.side == Side::Buy).collect();
        let sells: Vec<_> = next.runtime_state.grid_levels.iter().filter(|l| l.side == Side::Sell).collect();
        assert_eq!(buys.len(), 2);
        assert_eq!(sells.len(), 2);
        assert!(buys.iter().all(|l| l.price_micros < 100_000_000));
        assert!(sells.iter().all(|l| l.price_micros > 100_000_000));
    }

    #[test]
    fn filled_level_refills_with_flipped_side_after_one_tick() {
        let (next, _) = evaluate(&strat(), &snap(100_000_000), &[]);
        let mut s = next;
        // Arm level 0.
        let (next2, action2) = evaluate(&s, &snap(100_000_000), &[]);
        let client_id = match action2 {
            Action::Submit(ref o) => o.client_id.clone(),
            _ => panic!("expected submit"),
        };
        s = next2;
        let original_side = s.runtime_state.grid_levels[0].side;

        let fills = vec![OrderUpdate {
            client_id,
            status: OrderStatus::Filled,
            filled_qty: 1,
            avg_fill_price_micros: 90_000_000,
        }];
        let (next3, action3) = evaluate(&s, &snap(90_000_000), &fills);
        assert_eq!(action3, Action::NoOp);
        assert!(next3.runtime_state.grid_refill_due[0]);
        s = next3;

        let (next4, action4) = evaluate(&s, &snap(90_000_000), &[]);
        assert!(matches!(action4, Action::Submit(_)));
        assert_eq!(next4.runtime_state.grid_levels[0].side, flip(original_side));
        assert!(!next4.runtime_state.grid_refill_due[0]);
    }
}
