use mqk_execution::{OrderStatus, OrderType, Side};

use crate::types::{apply_pct_down, Action, MarketSnapshot, OrderRequest, OrderUpdate, Phase, Strategy, VariantParams};

fn trailing_bps(strategy: &Strategy) -> i64 {
    match strategy.variant_params {
        VariantParams::TrailingStop { trailing_bps } => trailing_bps,
        _ => unreachable!("dispatched only for trailing_stop"),
    }
}

fn entry_client_id(strategy: &Strategy) -> String {
    format!("{}-entry", strategy.id)
}

fn exit_client_id(strategy: &Strategy) -> String {
    format!("{}-exit", strategy.id)
}

/// `pending -> entry_active -> position_open -> exiting -> completed`. Entry
/// is a market buy unless `entry_price_micros` names a limit; the exit
/// trigger is evaluated here (not delegated to the broker) using the
/// watermark rule in §4.5: `last <= watermark * (1 - trailing_pct)`, with the
/// watermark folding in the current bar's high before the test.
pub fn evaluate(strategy: &Strategy, market: &MarketSnapshot, updates: &[OrderUpdate]) -> (Strategy, Action) {
    let mut next = strategy.clone();
    next.updated_at = market.ts_utc;

    match strategy.phase {
        Phase::Pending => {
            let client_id = entry_client_id(strategy);
            next.phase = Phase::EntryActive;
            next.runtime_state.entry_order_id = Some(client_id.clone());
            let order = match strategy.entry_price_micros {
                Some(limit) => OrderRequest {
                    client_id,
                    symbol: strategy.symbol.clone(),
                    side: Side::Buy,
                    order_type: OrderType::Limit,
                    limit_price_micros: Some(limit),
                    stop_price_micros: None,
                    quantity: strategy.quantity,
                    oco_peer_id: None,
                },
                None => OrderRequest {
                    client_id,
                    symbol: strategy.symbol.clone(),
                    side: Side::Buy,
                    order_type: OrderType::Market,
                    limit_price_micros: None,
                    stop_price_micros: None,
                    quantity: strategy.quantity,
                    oco_peer_id: None,
                },
            };
            (next, Action::Submit(order))
        }
        Phase::EntryActive => {
            let Some(entry_id) = &strategy.runtime_state.entry_order_id else {
                return (next, Action::NoOp);
            };
            if let Some(fill) = updates.iter().find(|u| &u.client_id == entry_id && u.status == OrderStatus::Filled) {
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
            let Some(exit_id) = &strategy.runtime_state.entry_order_id else {
                return (next, Action::NoOp);
            };
            if updates.iter().any(|u| &u.client_id == exit_id && u.status == OrderStatus::Filled) {
                next.phase = Phase::Completed;
                next.runtime_state.entry_order_id = None;
            }
            (next, Action::NoOp)
        }
        Phase::Completed | Phase::Cancelled => (next, Action::NoOp),
    }
}

fn maybe_exit(strategy: &Strategy, next: &mut Strategy, market: &MarketSnapshot, watermark: i64) -> (Strategy, Action) {
    let trigger = apply_pct_down(watermark, trailing_bps(strategy));
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
