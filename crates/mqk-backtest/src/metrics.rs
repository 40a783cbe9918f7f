use chrono::{DateTime, Utc};

use crate::types::TradeResult;

/// Summary statistics computed once at the end of a run. `f64` is used here
/// deliberately — these are reporting values at the output boundary, not
/// inputs to any further control-flow decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metrics {
    pub total_return_micros: i64,
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    /// Gross profit / gross loss. `f64::INFINITY` when there were winners
    /// and no losers; `0.0` when there were neither.
    pub profit_factor: f64,
    pub max_drawdown_micros: i64,
    /// `max_drawdown_micros` relative to the peak equity it was measured
    /// from, not the initial cash — a drawdown off a high-water mark reads
    /// the same whether the run started in profit or not.
    pub max_drawdown_pct: f64,
    pub avg_win_micros: i64,
    pub avg_loss_micros: i64,
    pub largest_win_micros: i64,
    pub largest_loss_micros: i64,
    /// `None` unless the equity curve has at least 30 per-bar return
    /// observations — too few to be meaningful otherwise.
    pub sharpe_ratio: Option<f64>,
}

pub fn compute(initial_cash_micros: i64, equity_curve: &[(DateTime<Utc>, i64)], trades: &[TradeResult]) -> Metrics {
    let final_equity = equity_curve.last().map(|(_, e)| *e).unwrap_or(initial_cash_micros);
    let total_return_micros = final_equity - initial_cash_micros;
    let total_return_pct = if initial_cash_micros != 0 {
        total_return_micros as f64 / initial_cash_micros as f64 * 100.0
    } else {
        0.0
    };

    let wins: Vec<i64> = trades.iter().map(|t| t.pnl_micros).filter(|p| *p > 0).collect();
    let losses: Vec<i64> = trades.iter().map(|t| t.pnl_micros).filter(|p| *p < 0).collect();

    let win_rate_pct = if trades.is_empty() { 0.0 } else { wins.len() as f64 / trades.len() as f64 * 100.0 };

    let gross_profit: i64 = wins.iter().sum();
    let gross_loss: i64 = losses.iter().map(|p| p.abs()).sum();
    let profit_factor = if gross_loss == 0 {
        if gross_profit > 0 { f64::INFINITY } else { 0.0 }
    } else {
        gross_profit as f64 / gross_loss as f64
    };

    let avg_win_micros = if wins.is_empty() { 0 } else { gross_profit / wins.len() as i64 };
    let avg_loss_micros = if losses.is_empty() { 0 } else { -(gross_loss / losses.len() as i64) };
    let largest_win_micros = wins.iter().copied().max().unwrap_or(0);
    let largest_loss_micros = losses.iter().copied().min().unwrap_or(0);

    let (max_drawdown_micros, max_drawdown_pct) = max_drawdown(equity_curve);
    let sharpe_ratio = sharpe(equity_curve);

    Metrics {
        total_return_micros,
        total_return_pct,
        win_rate_pct,
        profit_factor,
        max_drawdown_micros,
        max_drawdown_pct,
        avg_win_micros,
        avg_loss_micros,
        largest_win_micros,
        largest_loss_micros,
        sharpe_ratio,
    }
}

fn max_drawdown(equity_curve: &[(DateTime<Utc>, i64)]) -> (i64, f64) {
    let mut peak = i64::MIN;
    let mut worst = 0i64;
    let mut worst_peak = 0i64;
    for (_, equity) in equity_curve {
        peak = peak.max(*equity);
        let drawdown = peak - equity;
        if drawdown > worst {
            worst = drawdown;
            worst_peak = peak;
        }
    }
    let pct = if worst_peak != 0 { worst as f64 / worst_peak as f64 * 100.0 } else { 0.0 };
    (worst, pct)
}

const MIN_OBSERVATIONS_FOR_SHARPE: usize = 30;

fn sharpe(equity_curve: &[(DateTime<Utc>, i64)]) -> Option<f64> {
    if equity_curve.len() < MIN_OBSERVATIONS_FOR_SHARPE + 1 {
        return None;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].1 != 0)
        .map(|w| (w[1].1 - w[0].1) as f64 / w[0].1 as f64)
        .collect();
    if returns.len() < MIN_OBSERVATIONS_FOR_SHARPE {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return None;
    }
    Some(mean / stddev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(minute: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc) + chrono::Duration::minutes(minute)
    }

    #[test]
    fn profit_factor_is_infinite_with_no_losers() {
        let trades = vec![
            TradeResult { strategy_id: "s".into(), symbol: "AAPL".into(), entry_price_micros: 0, exit_price_micros: 0, quantity: 1, pnl_micros: 100 },
        ];
        let m = compute(1_000, &[(t(0), 1_000), (t(1), 1_100)], &trades);
        assert_eq!(m.profit_factor, f64::INFINITY);
    }

    #[test]
    fn max_drawdown_tracks_worst_peak_to_trough() {
        let curve = vec![(t(0), 100), (t(1), 120), (t(2), 90), (t(3), 110)];
        let (worst, pct) = max_drawdown(&curve);
        assert_eq!(worst, 30);
        assert_eq!(pct, 25.0);
    }

    #[test]
    fn sharpe_is_none_below_threshold() {
        let curve: Vec<_> = (0..10).map(|i| (t(i), 100 + i)).collect();
        assert_eq!(sharpe(&curve), None);
    }

    #[test]
    fn win_rate_and_totals_on_mixed_trades() {
        let trades = vec![
            TradeResult { strategy_id: "s".into(), symbol: "AAPL".into(), entry_price_micros: 0, exit_price_micros: 0, quantity: 1, pnl_micros: 200 },
            TradeResult { strategy_id: "s".into(), symbol: "AAPL".into(), entry_price_micros: 0, exit_price_micros: 0, quantity: 1, pnl_micros: -100 },
        ];
        let m = compute(1_000, &[(t(0), 1_000), (t(1), 1_100)], &trades);
        assert_eq!(m.win_rate_pct, 50.0);
        assert_eq!(m.avg_win_micros, 200);
        assert_eq!(m.avg_loss_micros, -100);
        assert_eq!(m.profit_factor, 2.0);
    }
}
