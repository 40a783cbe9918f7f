use mqk_execution::{OrderStatus, OrderType, Side};

use crate::types::{apply_pct_up, Action, MarketSnapshot, OrderRequest, OrderUpdate, Phase, Strategy, VariantParams};

fn params(strategy: &Strategy) -> (&[i64], &[i64]) {
    match &strategy.variant_params {
        VariantParams::ScaleOut { rungs_bps, fractions_bps } => (rungs_bps, fractions_bps),
        _ => unreachable!("dispatched only for scale_out"),
    }
}

fn id(strategy: &Strategy, leg: &str) -> String {
    format!("{}-{}", strategy.id, leg)
}

/// Splits exit quantity across ascending price rungs. `fractions_bps` carries
/// each rung's share of `quantity` in basis points; the last rung absorbs
/// whatever integer-division residue the earlier rungs left behind so the
/// rung quantities always sum to exactly `quantity`.
fn rung_quantities(quantity: i64, fractions_bps: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(fractions_bps.len());
    let mut allocated = 0;
    for (i, frac) in fractions_bps.iter().enumerate() {
        if i + 1 == fractions_bps.len() {
            out.push(quantity - allocated);
        } else {
            let qty = (quantity * frac) / crate::types::BPS_SCALE;
            allocated += qty;
            out.push(qty);
        }
    }
    out
}

/// Entry fills once, then each rung is placed as a resting limit sell; once
/// every rung has filled the strategy completes. Rungs are placed eagerly
/// (all at once) since, unlike the bracket's OCO pair, they don't need to
/// observe each other's acks before existing.
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
            if let Some(fill) = updates.iter().find(|u| u.client_id == entry_id && u.status == OrderStatus::Filled) {
                next.phase = Phase::PositionOpen;
                next.runtime_state.entry_fill_price_micros = Some(fill.avg_fill_price_micros);
                next.runtime_state.entry_order_id = None;
                let (rungs_bps, _) = params(strategy);
                next.runtime_state.rung_order_ids = vec![None; rungs_bps.len()];
                next.runtime_state.rungs_filled = vec![false; rungs_bps.len()];
                (next, Action::NoOp)
            } else {
                (next, Action::NoOp)
            }
        }
        Phase::PositionOpen => evaluate_rungs(strategy, &mut next, updates),
        Phase::Exiting | Phase::Completed | Phase::Cancelled => (next, Action::NoOp),
    }
}

fn evaluate_rungs(strategy: &Strategy, next: &mut Strategy, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let (rungs_bps, fractions_bps) = params(strategy);
    let entry = strategy.runtime_state.entry_fill_price_micros.expect("position_open implies entry filled");
    let quantities = rung_quantities(strategy.quantity, fractions_bps);

    for (i, rung_bps) in rungs_bps.iter().enumerate() {
        if strategy.runtime_state.rungs_filled[i] {
            continue;
        }
        if let Some(client_id) = &strategy.runtime_state.rung_order_ids[i] {
            if updates.iter().any(|u| &u.client_id == client_id && u.status == OrderStatus::Filled) {
                next.runtime_state.rungs_filled[i] = true;
                if next.runtime_state.rungs_filled.iter().all(|done| *done) {
                    next.phase = Phase::Completed;
                }
                return (next.clone(), Action::NoOp);
            }
            continue;
        }
        let client_id = id(strategy, &format!("rung{i}"));
        next.runtime_state.rung_order_ids[i] = Some(client_id.clone());
        let order = OrderRequest {
            client_id,
            symbol: strategy.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            limit_price_micros: Some(apply_pct_up(entry, *rung_bps)),
            stop_price_micros: None,
            quantity: quantities[i],
            oco_peer_id: None,
        };
        return (next.clone(), Action::Submit(order));
    }

    (next.clone(), Action::NoOp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuntimeState;
    use chrono::{DateTime, Utc};

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn residue_folds_into_last_rung() {
        // 3 rungs, 3334/3333/3333 bps (sums to 10_000), quantity 10 -> 3,3,4.
        let qty = rung_quantities(10, &[3_334, 3_333, 3_333]);
        assert_eq!(qty, vec![3, 3, 4]);
        assert_eq!(qty.iter().sum::<i64>(), 10);
    }

    #[test]
    fn places_rungs_one_at_a_time_then_completes() {
        const M: i64 = 1_000_000;
        let mut rs = RuntimeState::default();
        rs.entry_fill_price_micros = Some(100 * M);
        rs.rung_order_ids = vec![None, None];
        rs.rungs_filled = vec![false, false];
        let strat = Strategy {
            id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 10,
            entry_price_micros: None,
            variant_params: VariantParams::ScaleOut { rungs_bps: vec![500, 1_000], fractions_bps: vec![5_000, 5_000] },
            phase: Phase::PositionOpen,
            enabled: true,
            schedule_at: None,
            schedule_enabled: false,
            runtime_state: rs,
            created_at: t("2026-01-01T00:00:00Z"),
            updated_at: t("2026-01-01T00:00:00Z"),
        };
        let market = MarketSnapshot {
            symbol: "AAPL".to_string(),
            last_micros: 100 * M,
            bar_high_micros: Some(100 * M),
            bar_low_micros: Some(100 * M),
            ts_utc: t("2026-01-01T00:01:00Z"),
        };

        let (next1, action1) = evaluate(&strat, &market, &[]);
        assert!(matches!(action1, Action::Submit(_)));
        let rung0_id = next1.runtime_state.rung_order_ids[0].clone().unwrap();

        let (next2, action2) = evaluate(&next1, &market, &[]);
        assert!(matches!(action2, Action::Submit(_)));
        let rung1_id = next2.runtime_state.rung_order_ids[1].clone().unwrap();

        let fill0 = vec![OrderUpdate {
            client_id: rung0_id,
            status: OrderStatus::Filled,
            filled_qty: 5,
            avg_fill_price_micros: 105 * M,
        }];
        let (next3, _) = evaluate(&next2, &market, &fill0);
        assert!(next3.runtime_state.rungs_filled[0]);
        assert_ne!(next3.phase, Phase::Completed);

        let fill1 = vec![OrderUpdate {
            client_id: rung1_id,
            status: OrderStatus::Filled,
            filled_qty: 5,
            avg_fill_price_micros: 110 * M,
        }];
        let (next4, _) = evaluate(&next3, &market, &fill1);
        assert_eq!(next4.phase, Phase::Completed);
    }
}
