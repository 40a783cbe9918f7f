use crate::types::{Action, MarketSnapshot, OcoDesyncError, OrderUpdate, Phase, Strategy, VariantParams};
use crate::variants;

/// Dispatches a strategy's current phase and variant to the matching
/// variant module, advancing it by exactly one step. Pure: no IO, no clock
/// reads — `market` and `updates` are the only inputs.
pub fn evaluate(strategy: &Strategy, market: &MarketSnapshot, updates: &[OrderUpdate]) -> (Strategy, Action) {
    if strategy.phase.is_terminal() {
        return (strategy.clone(), Action::NoOp);
    }
    match strategy.variant_params {
        VariantParams::TrailingStop { .. } => variants::trailing_stop::evaluate(strategy, market, updates),
        VariantParams::Bracket { .. } => variants::bracket::evaluate(strategy, market, updates),
        VariantParams::ScaleOut { .. } => variants::scale_out::evaluate(strategy, market, updates),
        VariantParams::Grid { .. } => variants::grid::evaluate(strategy, market, updates),
        VariantParams::PullbackTrailing { .. } => variants::pullback_trailing::evaluate(strategy, market, updates),
    }
}

/// If the last `evaluate` call just set `oco_desync`, surfaces it once as a
/// structured error for the caller to audit. Only the bracket variant can
/// desync; every other variant returns `None`.
pub fn desync_error(strategy: &Strategy) -> Option<OcoDesyncError> {
    match strategy.variant_params {
        VariantParams::Bracket { .. } => variants::bracket::desync_error(strategy),
        _ => None,
    }
}

/// Honors an external cancel request between transitions: moves to
/// `Cancelled` and emits a `Cancel` for whichever order is currently
/// outstanding, if any. The caller is responsible for re-invoking this (or
/// plain `evaluate`) on subsequent ticks until every resting order this
/// strategy owns has actually been cancelled at the broker.
pub fn cancel(strategy: &Strategy) -> (Strategy, Action) {
    let mut next = strategy.clone();
    if strategy.phase.is_terminal() {
        return (next, Action::NoOp);
    }
    next.phase = Phase::Cancelled;

    for candidate in [
        strategy.runtime_state.entry_order_id.clone(),
        strategy.runtime_state.tp_order_id.clone(),
        strategy.runtime_state.sl_order_id.clone(),
    ]
    .into_iter()
    .flatten()
    {
        return (next, Action::Cancel { client_id: candidate });
    }
    for rung in strategy.runtime_state.rung_order_ids.iter().flatten() {
        return (next, Action::Cancel { client_id: rung.clone() });
    }
    for level in &strategy.runtime_state.grid_levels {
        if let Some(client_id) = &level.order_client_id {
            return (next, Action::Cancel { client_id: client_id.clone() });
        }
    }

    (next, Action::NoOp)
}
