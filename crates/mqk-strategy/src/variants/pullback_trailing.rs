use mqk_execution::{OrderStatus, OrderType, Side};

use crate::types::{apply_pct_down, Action, MarketSnapshot, OrderRequest, OrderUpdate, Phase, Strategy, VariantParams};

fn bps(strategy: &Strategy) -> (i64, i64) {
    match strategy.variant_params {
        VariantParams::PullbackTrailing { pullback_bps, trailing_bps } => (pullback_bps, trailing_bps),
        _ => unreachable!("dispatched only for pullback_trailing"),
    }
}

fn entry_client_id(strategy: &Strategy) -> String {
    format!("{}-entry", strategy.id)
}

fn exit_client_id(strategy: &Strategy) -> String {
    format!("{}-exit", strategy.id)
}

/// Waits for price to pull back `pullback_bps` off an observed pre-entry
/// high before entering, then behaves exactly like [`trailing_stop`] once the
/// position is open. `runtime_state.pre_entry_high_micros` is distinct from
/// `high_watermark_micros`, which only starts tracking after entry fills.
pub fn evaluate(strategy: &Strategy, market: &MarketSnapshot, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let mut next = strategy.clone();
    next.updated_at = market.ts_utc;

    match strategy.phase {
        Phase::Pending => {
            let (pullback_bps, _) = bps(strategy);
            let pre_high = strategy
                .runtime_state
                .pre_entry_high_micros
                .unwrap_or(market.watermark_candidate())
                .max(market.watermark_candidate());
            next.runtime_state.pre_entry_high_micros = Some(pre_high);

            let trigger = apply_pct_down(pre_high, pullback_bps);
            if market.last_micros > trigger {
                return (next, Action::NoOp);
            }

            let client_id = entry_client_id(strategy);
            next.phase = Phase::EntryActive;
            next.runtime_state.entry_order_id = Some(client_id.clone());
            let order = OrderRequest {
                client_id,
                symbol: strategy.symbol.clone(),
                side: Side::Buy,
                order_type: OrderType::Market,
                limit_price_micros: None,
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
                let watermark = fill.avg_fill_price_micros.max(market.watermark_candidate());
                next.runtime_state.high_watermark_micros = Some(watermark);
                maybe_exit(strategy, &mut next, market, watermark)
            } else {
                (next, Action::NoOp)
            }
        }
        Phase::PositionOpen => {
            let watermark = strategy
                .runtime_state
                .high_watermark_micros
                .unwrap_or(market.watermark_candidate())
                .max(market.watermark_candidate());
            next.runtime_state.high_watermark_micros = Some(watermark);
            maybe_exit(strategy, &mut next, market, watermark)
        }
        Phase::Exiting => {
            let Some(exit_id) = strategy.runtime_state.entry_order_id.clone() else {
                return (next, Action::NoOp);
            };
            if updates.iter().any(|u| u.client_id == exit_id && u.status == OrderStatus::Filled) {
                next.phase = Phase::Completed;
                next.runtime_state.entry_order_id = None;
            }
            (next, Action::NoOp)
        }
        Phase::Completed | Phase::Cancelled => (next, Action::NoOp),
    }
}

fn maybe_exit(strategy: &Strategy, next: &mut Strategy, market: &MarketSnapshot, watermark: i64) -> (Strategy, Action) {
    let (_, trailing_bps) = bps(strategy);
    let trigger = apply_pct_down(watermark, trailing_bps);
    if market.last_micros <= trigger {
        let client_id = exit_client_id(strategy);
        next.phase = Phase::Exiting;
        next.runtime_state.entry_order_id = Some(client_id.clone());
        let order = OrderRequest {
            client_id,
            symbol: strategy.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::Market,
            limit_price_micros: None,
            stop_price_micros: None,
            quantity: strategy.quantity,
            oco_peer_id: None,
        };
        (next.clone(), Action::Submit(order))
    } else {
        (next.clone(), Action::NoOp)
    }
}
