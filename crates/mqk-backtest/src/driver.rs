//! The Backtest Engine: replays a bar sequence through the exact same
//! evaluator, Safety Gate, and Order Router the live engine uses, swapping
//! only the broker for `mqk-broker-historical`. An order submitted during a
//! bar's evaluation is resolved against that same bar by the Historical
//! Broker; the evaluator only learns the outcome at the following bar, same
//! as a live broker's asynchronous ack.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};

use mqk_broker_historical::{Bar, HistoricalBroker};
use mqk_execution::{Order, OrderRouter, OrderSnapshot, OrderStatus, OrderType as ExecOrderType, Side as ExecSide};
use mqk_portfolio::{Fill as PortfolioFill, Ledger, MarkMap, Side as PortfolioSide};
use mqk_risk::pdt::{self, DayTradeLedger, PdtPolicy};
use mqk_risk::{AccountState, OrderType as RiskOrderType, ProposedOrder, RecentOrder, Side as RiskSide};
use mqk_strategy::{Action, MarketSnapshot, OrderRequest, OrderUpdate, Phase, Strategy};

use crate::metrics;
use crate::types::{BacktestBar, BacktestConfig, BacktestFailure, BacktestReport, TradeResult};

/// Runs one or more strategies against a historical bar set, reusing the
/// evaluator, Safety Gate, and Order Router unchanged from live execution.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, strategies: Vec<Strategy>, bars_by_symbol: &BTreeMap<String, Vec<BacktestBar>>) -> BacktestReport {
        let mut failures = Vec::new();
        let mut live: BTreeMap<String, Strategy> = BTreeMap::new();
        let mut by_symbol: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut entry_price_by_strategy: BTreeMap<String, i64> = BTreeMap::new();

        for strategy in strategies {
            let bars = bars_by_symbol.get(&strategy.symbol);
            if bars.map(|b| b.is_empty()).unwrap_or(true) {
                failures.push(BacktestFailure::NoData { symbol: strategy.symbol.clone() });
                continue;
            }
            by_symbol.entry(strategy.symbol.clone()).or_default().insert(strategy.id.clone());
            live.insert(strategy.id.clone(), strategy);
        }

        let mut bar_at: BTreeMap<(String, DateTime<Utc>), &BacktestBar> = BTreeMap::new();
        let mut timeline: BTreeSet<DateTime<Utc>> = BTreeSet::new();
        for symbol in by_symbol.keys() {
            for bar in &bars_by_symbol[symbol] {
                bar_at.insert((symbol.clone(), bar.ts_utc), bar);
                timeline.insert(bar.ts_utc);
            }
        }

        let mut router = OrderRouter::new(HistoricalBroker::new());
        let mut ledger = Ledger::new(self.config.initial_cash_micros);
        let mut marks: MarkMap = MarkMap::new();
        let mut recent_orders: Vec<RecentOrder> = Vec::new();
        let mut equity_curve: Vec<(DateTime<Utc>, i64)> = Vec::new();
        let mut trades: Vec<TradeResult> = Vec::new();
        let mut fills: Vec<PortfolioFill> = Vec::new();
        let mut pending_updates: BTreeMap<String, Vec<OrderUpdate>> = BTreeMap::new();

        let mut current_day: Option<NaiveDate> = None;
        let mut day_start_equity_micros = self.config.initial_cash_micros;
        // PDT enforcement stays off for a backtest replay (PdtPolicy::disabled's
        // documented purpose) but still flows through the real ledger, not a
        // hardcoded context, so a caller that swaps in `finra_defaults` gets
        // correct accounting for free.
        let mut day_trade_ledger = DayTradeLedger::new(PdtPolicy::disabled());

        for ts in &timeline {
            let day = ts.date_naive();
            if current_day != Some(day) {
                day_start_equity_micros = ledger.equity_micros(&marks);
                current_day = Some(day);
            }

            for (symbol, strategy_ids) in &by_symbol {
                let Some(&bt_bar) = bar_at.get(&(symbol.clone(), *ts)) else { continue };
                marks.insert(symbol.clone(), bt_bar.close_micros);
                let bar = to_broker_bar(bt_bar);
                let snapshot = to_market_snapshot(bt_bar);

                for strategy_id in strategy_ids {
                    let Some(strategy) = live.get(strategy_id) else { continue };
                    if strategy.phase.is_terminal() {
                        continue;
                    }
                    let incoming = pending_updates.remove(strategy_id).unwrap_or_default();
                    let was_initial_entry = strategy.phase == Phase::Pending;
                    let (mut next, action) = mqk_strategy::evaluate(strategy, &snapshot, &incoming);

                    match action {
                        Action::NoOp => {}
                        Action::Submit(req) => {
                            let reducing = is_risk_reducing(&ledger, &req);
                            let proposed = to_proposed_order(&req, bt_bar.close_micros, reducing, *ts);
                            let account = account_state(&ledger, &marks, symbol, day_start_equity_micros);
                            let pdt_context = day_trade_ledger.context_for(symbol, pdt::day_id(*ts), account.equity_micros, !reducing);
                            let decision = mqk_risk::evaluate(
                                &proposed,
                                &account,
                                &recent_orders,
                                &pdt_context,
                                &self.config.policy,
                                *ts,
                            );
                            match decision {
                                Ok(_) => {
                                    recent_orders.push(to_recent_order(&proposed));
                                    let order = to_exec_order(&req, strategy_id, *ts);
                                    let _ = router.submit(order);
                                }
                                Err(err) => {
                                    if was_initial_entry {
                                        next.phase = Phase::Cancelled;
                                        failures.push(BacktestFailure::StrategyRejected {
                                            strategy_id: strategy_id.clone(),
                                            reason: err.to_string(),
                                        });
                                    }
                                    // A later leg refused is left to stall rather than
                                    // guessing at a recovery the spec doesn't define.
                                }
                            }
                        }
                        Action::Cancel { client_id } => {
                            if let Ok(snap) = router.cancel(&client_id) {
                                pending_updates.entry(strategy_id.clone()).or_default().push(to_order_update(&snap));
                            }
                        }
                    }

                    live.insert(strategy_id.clone(), next);
                }

                let advanced = router.broker_mut().advance_bar(&bar);
                for snap in &advanced {
                    if snap.status != OrderStatus::Filled {
                        pending_updates.entry(snap.parent_strategy_id.clone()).or_default().push(to_order_update(snap));
                        continue;
                    }

                    if snap.side == ExecSide::Buy && entry_price_by_strategy.get(&snap.parent_strategy_id).is_none() {
                        entry_price_by_strategy.insert(snap.parent_strategy_id.clone(), snap.avg_fill_price_micros);
                    }

                    let position_before = ledger.qty_signed(&snap.symbol);
                    let reducing = match snap.side {
                        ExecSide::Sell => position_before > 0,
                        ExecSide::Buy => position_before < 0,
                    };

                    let before = ledger.realized_pnl_micros();
                    let portfolio_fill = to_portfolio_fill(snap);
                    let _ = ledger.append_fill(portfolio_fill.clone());
                    fills.push(portfolio_fill);
                    let delta = ledger.realized_pnl_micros() - before;
                    day_trade_ledger.record_fill(&snap.symbol, pdt::day_id(*ts), !reducing);

                    if snap.side == ExecSide::Sell && delta != 0 {
                        let entry_price = entry_price_by_strategy.get(&snap.parent_strategy_id).copied().unwrap_or(0);
                        trades.push(TradeResult {
                            strategy_id: snap.parent_strategy_id.clone(),
                            symbol: snap.symbol.clone(),
                            entry_price_micros: entry_price,
                            exit_price_micros: snap.avg_fill_price_micros,
                            quantity: snap.filled_qty,
                            pnl_micros: delta,
                        });
                    }

                    pending_updates.entry(snap.parent_strategy_id.clone()).or_default().push(to_order_update(snap));
                }
            }

            equity_curve.push((*ts, ledger.equity_micros(&marks)));
        }

        let computed = metrics::compute(self.config.initial_cash_micros, &equity_curve, &trades);
        BacktestReport {
            equity_curve,
            fills,
            trades,
            metrics: computed,
            failures,
        }
    }
}

fn to_broker_bar(b: &BacktestBar) -> Bar {
    Bar {
        symbol: b.symbol.clone(),
        ts_utc: b.ts_utc,
        open_micros: b.open_micros,
        high_micros: b.high_micros,
        low_micros: b.low_micros,
        close_micros: b.close_micros,
    }
}

fn to_market_snapshot(b: &BacktestBar) -> MarketSnapshot {
    MarketSnapshot {
        symbol: b.symbol.clone(),
        last_micros: b.close_micros,
        bar_high_micros: Some(b.high_micros),
        bar_low_micros: Some(b.low_micros),
        ts_utc: b.ts_utc,
    }
}

fn to_exec_order(req: &OrderRequest, strategy_id: &str, now: DateTime<Utc>) -> Order {
    Order {
        client_id: req.client_id.clone(),
        broker_id: None,
        symbol: req.symbol.clone(),
        side: req.side,
        order_type: req.order_type,
        limit_price_micros: req.limit_price_micros,
        stop_price_micros: req.stop_price_micros,
        trailing_bps: None,
        quantity: req.quantity,
        status: OrderStatus::Pending,
        filled_qty: 0,
        avg_fill_price_micros: 0,
        created_at: now,
        updated_at: now,
        parent_strategy_id: strategy_id.to_string(),
        oco_peer_id: req.oco_peer_id.clone(),
    }
}

fn to_order_update(snap: &OrderSnapshot) -> OrderUpdate {
    OrderUpdate {
        client_id: snap.client_id.clone(),
        status: snap.status,
        filled_qty: snap.filled_qty,
        avg_fill_price_micros: snap.avg_fill_price_micros,
    }
}

fn to_portfolio_fill(snap: &OrderSnapshot) -> PortfolioFill {
    let side = match snap.side {
        ExecSide::Buy => PortfolioSide::Buy,
        ExecSide::Sell => PortfolioSide::Sell,
    };
    PortfolioFill::new(snap.symbol.clone(), side, snap.filled_qty, snap.avg_fill_price_micros, 0)
}

fn is_risk_reducing(ledger: &Ledger, req: &OrderRequest) -> bool {
    let position = ledger.qty_signed(&req.symbol);
    match req.side {
        ExecSide::Sell => position > 0,
        ExecSide::Buy => position < 0,
    }
}

fn to_proposed_order(req: &OrderRequest, reference_price_micros: i64, is_risk_reducing: bool, now: DateTime<Utc>) -> ProposedOrder {
    let side = match req.side {
        ExecSide::Buy => RiskSide::Buy,
        ExecSide::Sell => RiskSide::Sell,
    };
    let order_type = match req.order_type {
        ExecOrderType::Market => RiskOrderType::Market,
        ExecOrderType::Limit => RiskOrderType::Limit,
        ExecOrderType::Stop | ExecOrderType::TrailingStop => RiskOrderType::Stop,
    };
    let reference = req.limit_price_micros.or(req.stop_price_micros).unwrap_or(reference_price_micros);
    ProposedOrder {
        symbol: req.symbol.clone(),
        side,
        order_type,
        quantity: req.quantity,
        limit_price_micros: req.limit_price_micros,
        stop_price_micros: req.stop_price_micros,
        estimated_notional_micros: req.quantity.saturating_mul(reference),
        is_risk_reducing,
        submitted_at: now,
    }
}

fn to_recent_order(order: &ProposedOrder) -> RecentOrder {
    RecentOrder {
        symbol: order.symbol.clone(),
        side: order.side,
        order_type: order.order_type,
        quantity: order.quantity,
        limit_price_micros: order.limit_price_micros,
        stop_price_micros: order.stop_price_micros,
        submitted_at: order.submitted_at,
    }
}

fn account_state(ledger: &Ledger, marks: &MarkMap, symbol: &str, day_start_equity_micros: i64) -> AccountState {
    let equity = ledger.equity_micros(marks);
    let position_qty = ledger.qty_signed(symbol);
    let mark = marks.get(symbol).copied().unwrap_or(0);
    AccountState {
        equity_micros: equity,
        day_start_equity_micros,
        buying_power_micros: ledger.cash_micros().max(0),
        position_qty,
        position_notional_micros: position_qty.abs().saturating_mul(mark),
        kill_switch_engaged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_strategy::VariantParams;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn bar(ts: &str, symbol: &str, o: i64, h: i64, l: i64, c: i64) -> BacktestBar {
        const M: i64 = 1_000_000;
        BacktestBar {
            symbol: symbol.to_string(),
            ts_utc: t(ts),
            open_micros: o * M,
            high_micros: h * M,
            low_micros: l * M,
            close_micros: c * M,
        }
    }

    fn trailing_strategy() -> Strategy {
        let t0 = t("2026-01-01T00:00:00Z");
        Strategy {
            id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 10,
            entry_price_micros: None,
            variant_params: VariantParams::TrailingStop { trailing_bps: 500 },
            phase: Phase::Pending,
            enabled: true,
            schedule_at: None,
            schedule_enabled: false,
            runtime_state: mqk_strategy::RuntimeState::default(),
            created_at: t0,
            updated_at: t0,
        }
    }

    #[test]
    fn missing_symbol_data_is_recorded_as_no_data() {
        let engine = BacktestEngine::new(BacktestConfig::new(100_000 * 1_000_000));
        let report = engine.run(vec![trailing_strategy()], &BTreeMap::new());
        assert_eq!(
            report.failures,
            vec![BacktestFailure::NoData { symbol: "AAPL".to_string() }]
        );
        assert!(report.trades.is_empty());
    }

    #[test]
    fn full_run_is_deterministic_across_replays() {
        let bars = vec![
            bar("2026-01-01T09:30:00Z", "AAPL", 100, 100, 100, 100),
            bar("2026-01-01T09:31:00Z", "AAPL", 110, 110, 110, 110),
            bar("2026-01-01T09:32:00Z", "AAPL", 120, 120, 120, 120),
            bar("2026-01-01T09:33:00Z", "AAPL", 110, 110, 110, 110),
            bar("2026-01-01T09:34:00Z", "AAPL", 100, 100, 100, 100),
        ];
        let mut bars_by_symbol = BTreeMap::new();
        bars_by_symbol.insert("AAPL".to_string(), bars);

        let engine = BacktestEngine::new(BacktestConfig::new(100_000 * 1_000_000));
        let report1 = engine.run(vec![trailing_strategy()], &bars_by_symbol);
        let report2 = engine.run(vec![trailing_strategy()], &bars_by_symbol);

        assert_eq!(report1.equity_curve, report2.equity_curve);
        assert_eq!(report1.trades, report2.trades);
        assert_eq!(report1.metrics, report2.metrics);
        assert!(report1.failures.is_empty());
        assert_eq!(report1.trades.len(), 1);
        assert_eq!(report1.trades[0].entry_price_micros, 100 * 1_000_000);
        assert_eq!(report1.trades[0].exit_price_micros, 110 * 1_000_000);
    }
}
