use chrono::{DateTime, Utc};

use crate::types::find_duplicate;
use crate::{AccountState, ApprovalToken, PdtContext, PolicyConfig, ProposedOrder, RecentOrder, SafetyError};

/// Evaluate a proposed order against account state and policy.
///
/// Pure function: no IO, no clock reads (the caller supplies `now`), no
/// hidden state. Evaluation order is fixed — kill switch, then identity
/// checks (duplicate order, PDT), then monetary caps (position size, daily
/// loss, buying power) — so the first applicable refusal is always the one
/// reported, never shadowed by a later check.
pub fn evaluate(
    order: &ProposedOrder,
    account: &AccountState,
    recent_orders: &[RecentOrder],
    pdt: &PdtContext,
    cfg: &PolicyConfig,
    now: DateTime<Utc>,
) -> Result<ApprovalToken, SafetyError> {
    // 1) Kill switch overrides everything except risk-reducing orders.
    if account.kill_switch_engaged && !order.is_risk_reducing {
        return Err(SafetyError::KillSwitchEngaged);
    }

    // 2) Identity checks.
    if let Some(_dup) = find_duplicate(order, recent_orders, cfg.duplicate_window_seconds) {
        return Err(SafetyError::DuplicateOrder {
            within_seconds: cfg.duplicate_window_seconds,
        });
    }

    if !pdt.pdt_ok && !order.is_risk_reducing {
        return Err(SafetyError::PatternDayTradeBlocked);
    }

    // 3) Monetary caps.
    if !order.is_risk_reducing {
        let projected_qty = account
            .position_qty
            .abs()
            .saturating_add(order.quantity.abs());
        let projected_notional = account
            .position_notional_micros
            .abs()
            .saturating_add(order.estimated_notional_micros.abs());

        if projected_qty > cfg.max_position_qty
            || projected_notional > cfg.max_position_notional_micros
        {
            return Err(SafetyError::PositionSizeExceeded {
                projected_qty,
                max_qty: cfg.max_position_qty,
                projected_notional_micros: projected_notional,
                max_notional_micros: cfg.max_position_notional_micros,
            });
        }
    }

    if cfg.daily_loss_limit_micros > 0 {
        if let Some(floor) = account
            .day_start_equity_micros
            .checked_sub(cfg.daily_loss_limit_micros)
        {
            if account.equity_micros <= floor {
                return Err(SafetyError::DailyLossLimitExceeded {
                    equity_micros: account.equity_micros,
                    floor_micros: floor,
                });
            }
        }
    }

    if !order.is_risk_reducing && order.estimated_notional_micros > account.buying_power_micros {
        return Err(SafetyError::InsufficientBuyingPower {
            required_micros: order.estimated_notional_micros,
            available_micros: account.buying_power_micros,
        });
    }

    Ok(ApprovalToken { approved_at: now })
}
