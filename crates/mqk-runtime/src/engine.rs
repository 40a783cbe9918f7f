//! The Engine Cycle: one tick activates due schedules, evaluates every
//! active strategy, routes the resulting action through the Safety Gate and
//! Order Router, and persists the outcome — in that order, per strategy, in
//! deterministic strategy-id order across strategies (see the concurrency
//! model this crate implements).
//!
//! Generic over [`BrokerAdapter`] so the identical cycle drives a live
//! broker or, as wired by this crate's binary, the historical fill
//! simulator standing in for a paper-trading venue.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use mqk_audit::AuditWriter;
use mqk_execution::{BrokerAdapter, Order, OrderRouter, OrderSnapshot, OrderStatus, OrderType as ExecOrderType, RouterError, Side as ExecSide};
use mqk_portfolio::{Fill as PortfolioFill, Ledger, MarkMap, Side as PortfolioSide};
use mqk_risk::pdt::{self, DayTradeLedger, PdtPolicy};
use mqk_risk::{AccountState, OrderType as RiskOrderType, PolicyConfig, ProposedOrder, RecentOrder, Side as RiskSide};
use mqk_store::{StoreError, StrategyStore};
use mqk_strategy::{Action, MarketSnapshot, OrderRequest, OrderUpdate, Phase, Strategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Store(String),
    Lock(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Store(msg) => write!(f, "store error: {msg}"),
            EngineError::Lock(msg) => write!(f, "lock error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e.to_string())
    }
}

/// Summary of one `tick()` call, for the binary's log line and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub strategies_evaluated: usize,
    pub strategies_activated: usize,
    pub strategies_quarantined: usize,
    pub orders_submitted: usize,
    pub orders_cancelled: usize,
    pub orders_rejected_by_gate: usize,
    pub audit_healthy: bool,
}

/// Drives one configuration directory's strategy collection against a single
/// broker adapter. Owns the in-memory portfolio ledger used to compute
/// account state for the Safety Gate — the store only persists strategy
/// records, never portfolio state, so the ledger gets rebuilt from scratch on
/// restart by replaying the broker's current positions (a live engine must
/// do a reconciliation pass before its first tick; this engine does not
/// perform that reconciliation itself, matching the Broker capability being
/// out of scope for the core).
pub struct Engine<B: BrokerAdapter> {
    router: OrderRouter<B>,
    store: StrategyStore,
    engine_audit: AuditWriter,
    run_id: Uuid,
    policy: PolicyConfig,
    ledger: Ledger,
    marks: MarkMap,
    recent_orders: Vec<RecentOrder>,
    /// Day-trade history built from this engine's own fills, FINRA defaults
    /// enforced — the live engine is the one surface a flagged account
    /// actually restricts.
    pdt: DayTradeLedger,
    applied_fills: BTreeSet<String>,
    pending_updates: BTreeMap<String, Vec<OrderUpdate>>,
    current_day: Option<NaiveDate>,
    day_start_equity_micros: i64,
    /// Strategy id -> quarantine reason. A quarantined strategy is skipped by
    /// every future tick until an operator clears it out-of-band (the spec's
    /// per-strategy error isolation; the engine loop itself never aborts).
    quarantined: BTreeMap<String, String>,
}

impl<B: BrokerAdapter> Engine<B> {
    pub fn new(
        broker: B,
        store: StrategyStore,
        order_audit: AuditWriter,
        engine_audit: AuditWriter,
        run_id: Uuid,
        initial_cash_micros: i64,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            router: OrderRouter::with_audit(broker, order_audit, run_id),
            store,
            engine_audit,
            run_id,
            policy,
            ledger: Ledger::new(initial_cash_micros),
            marks: MarkMap::new(),
            recent_orders: Vec::new(),
            pdt: DayTradeLedger::new(PdtPolicy::finra_defaults()),
            applied_fills: BTreeSet::new(),
            pending_updates: BTreeMap::new(),
            current_day: None,
            day_start_equity_micros: initial_cash_micros,
            quarantined: BTreeMap::new(),
        }
    }

    pub fn router(&self) -> &OrderRouter<B> {
        &self.router
    }

    /// Mutable access to the router, chiefly so callers can reach
    /// broker-specific controls the `BrokerAdapter` trait doesn't expose —
    /// e.g. feeding bars into `HistoricalBroker` between ticks.
    pub fn router_mut(&mut self) -> &mut OrderRouter<B> {
        &mut self.router
    }

    pub fn quarantined(&self) -> &BTreeMap<String, String> {
        &self.quarantined
    }

    /// Runs one full cycle. Strategies are processed in ascending id order
    /// (`load_all` plus a `BTreeMap` keying gives this for free), which is
    /// the deterministic cross-strategy ordering the concurrency model
    /// requires.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();

        let loaded = self.store.load_all()?;
        let mut by_id: BTreeMap<String, Strategy> = loaded.into_iter().map(|s| (s.id.clone(), s)).collect();

        let day = now.date_naive();
        if self.current_day != Some(day) {
            self.day_start_equity_micros = self.ledger.equity_micros(&self.marks);
            self.current_day = Some(day);
        }

        self.prune_recent_orders(now);

        // (1) Schedule activation, for every strategy regardless of current
        // `enabled`, so a strategy whose time just arrived is promoted
        // before the evaluation pass below considers it.
        let ids: Vec<String> = by_id.keys().cloned().collect();
        for id in &ids {
            if self.quarantined.contains_key(id) {
                continue;
            }
            let strategy = by_id.get(id).expect("id came from by_id's own keys").clone();
            let (next, event) = mqk_strategy::activate_if_due(strategy, now);
            if let Some(event) = event {
                self.store.upsert(&next)?;
                report.strategies_activated += 1;
                self.audit_engine("SCHEDULE", "ACTIVATED", serde_json::json!({
                    "strategy_id": event.strategy_id,
                    "activated_at": event.activated_at.to_rfc3339(),
                }));
            }
            by_id.insert(id.clone(), next);
        }

        // (2)-(4): evaluator transition, order routing, persistence, per
        // active strategy, strategy ids ascending.
        let active_ids: Vec<String> = by_id
            .iter()
            .filter(|(id, s)| !self.quarantined.contains_key(*id) && s.is_active(now) && !s.phase.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        for strategy_id in active_ids {
            report.strategies_evaluated += 1;
            if let Err(reason) = self.process_strategy(&strategy_id, &mut by_id, now, &mut report) {
                self.quarantine(&strategy_id, &reason);
                report.strategies_quarantined += 1;
            }
        }

        report.audit_healthy = self.router.audit_healthy();
        Ok(report)
    }

    /// Processes one strategy's cycle step. Isolated into its own
    /// `Result`-returning function so a failure quarantines only this
    /// strategy rather than aborting the whole tick.
    fn process_strategy(
        &mut self,
        strategy_id: &str,
        by_id: &mut BTreeMap<String, Strategy>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), String> {
        let strategy = by_id.get(strategy_id).ok_or_else(|| "strategy vanished mid-tick".to_string())?.clone();

        self.poll_outstanding_fills(&strategy, now);
        let last_micros = self.refresh_mark(&strategy.symbol).map_err(|e| e.to_string())?;

        let incoming = self.pending_updates.remove(strategy_id).unwrap_or_default();
        let was_initial_entry = strategy.phase == Phase::Pending;
        let snapshot = MarketSnapshot {
            symbol: strategy.symbol.clone(),
            last_micros,
            bar_high_micros: None,
            bar_low_micros: None,
            ts_utc: now,
        };

        let (mut next, action) = mqk_strategy::evaluate(&strategy, &snapshot, &incoming);

        match action {
            Action::NoOp => {}
            Action::Submit(req) => {
                let reducing = is_risk_reducing(&self.ledger, &req);
                let proposed = to_proposed_order(&req, last_micros, reducing, now);
                let account = self.account_state(&strategy.symbol);
                let pdt_context = self.pdt.context_for(&strategy.symbol, pdt::day_id(now), account.equity_micros, !reducing);
                let decision = mqk_risk::evaluate(&proposed, &account, &self.recent_orders, &pdt_context, &self.policy, now);
                match decision {
                    Ok(_) => {
                        self.recent_orders.push(to_recent_order(&proposed));
                        let order = to_exec_order(&req, strategy_id, now);
                        self.router.submit(order).map_err(|e| e.to_string())?;
                        report.orders_submitted += 1;
                    }
                    Err(err) => {
                        report.orders_rejected_by_gate += 1;
                        self.audit_engine("SAFETY", "ORDER_REJECTED", serde_json::json!({
                            "strategy_id": strategy_id,
                            "reason": err.to_string(),
                        }));
                        if was_initial_entry {
                            next.phase = Phase::Cancelled;
                        }
                        // A later leg refused is left to stall rather than
                        // guessing at a recovery the evaluator doesn't define.
                    }
                }
            }
            Action::Cancel { client_id } => {
                if let Ok(snap) = self.router.cancel(&client_id) {
                    report.orders_cancelled += 1;
                    self.pending_updates.entry(strategy_id.to_string()).or_default().push(to_order_update(&snap));
                }
            }
        }

        if let Some(desync) = mqk_strategy::desync_error(&next) {
            self.audit_engine("OCO", "DESYNC", serde_json::json!({
                "strategy_id": desync.strategy_id,
                "filled_leg": desync.filled_leg,
                "stuck_leg": desync.stuck_leg,
            }));
        }

        self.store.upsert(&next).map_err(|e| e.to_string())?;
        by_id.insert(strategy_id.to_string(), next);
        Ok(())
    }

    /// External cancel, honored immediately rather than waiting for the next
    /// tick's evaluation. Applies the same commit discipline as the cycle:
    /// the evaluator returns `(new_record, action)` and this call persists
    /// and routes both atomically.
    pub fn cancel_strategy(&mut self, strategy_id: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let Some(strategy) = self.store.load(strategy_id)? else {
            return Ok(());
        };
        let (next, action) = mqk_strategy::cancel(&strategy);
        if let Action::Cancel { client_id } = &action {
            let _ = self.router.cancel(client_id);
        }
        self.store.upsert(&next)?;
        self.audit_engine("ENGINE", "STRATEGY_CANCELLED", serde_json::json!({
            "strategy_id": strategy_id,
            "cancelled_at": now.to_rfc3339(),
        }));
        Ok(())
    }

    fn quarantine(&mut self, strategy_id: &str, reason: &str) {
        self.quarantined.insert(strategy_id.to_string(), reason.to_string());
        self.audit_engine("ENGINE", "STRATEGY_QUARANTINED", serde_json::json!({
            "strategy_id": strategy_id,
            "reason": reason,
        }));
        tracing::error!(strategy_id, reason, "strategy quarantined");
    }

    fn audit_engine(&mut self, topic: &str, event_type: &str, payload: serde_json::Value) {
        if let Err(err) = self.engine_audit.append(self.run_id, topic, event_type, payload) {
            tracing::error!(%err, topic, event_type, "engine audit append failed");
        }
    }

    fn refresh_mark(&mut self, symbol: &str) -> Result<i64, RouterError> {
        let quote = self.router.quote(symbol)?;
        self.marks.insert(symbol.to_string(), quote.last_micros);
        Ok(quote.last_micros)
    }

    fn account_state(&self, symbol: &str) -> AccountState {
        let equity = self.ledger.equity_micros(&self.marks);
        let position_qty = self.ledger.qty_signed(symbol);
        let mark = self.marks.get(symbol).copied().unwrap_or(0);
        AccountState {
            equity_micros: equity,
            day_start_equity_micros: self.day_start_equity_micros,
            buying_power_micros: self.ledger.cash_micros().max(0),
            position_qty,
            position_notional_micros: position_qty.abs().saturating_mul(mark),
            kill_switch_engaged: false,
        }
    }

    /// Pulls the latest status for every order id this strategy's runtime
    /// state still names, applying newly-filled snapshots to the ledger
    /// exactly once (tracked via `applied_fills`) and queuing an
    /// `OrderUpdate` for the evaluator's next invocation — the live-engine
    /// analogue of the backtest driver's post-`advance_bar` fill loop.
    fn poll_outstanding_fills(&mut self, strategy: &Strategy, now: DateTime<Utc>) {
        let candidates: Vec<String> = [
            strategy.runtime_state.entry_order_id.clone(),
            strategy.runtime_state.tp_order_id.clone(),
            strategy.runtime_state.sl_order_id.clone(),
        ]
        .into_iter()
        .flatten()
        .chain(strategy.runtime_state.rung_order_ids.iter().flatten().cloned())
        .chain(strategy.runtime_state.grid_levels.iter().filter_map(|l| l.order_client_id.clone()))
        .collect();

        for client_id in candidates {
            if self.applied_fills.contains(&client_id) {
                continue;
            }
            let Ok(snap) = self.router.status(&client_id) else { continue };
            if snap.status != OrderStatus::Filled {
                self.pending_updates.entry(strategy.id.clone()).or_default().push(to_order_update(&snap));
                continue;
            }
            self.applied_fills.insert(client_id.clone());
            // Same side/position check as `is_risk_reducing`, against the
            // fill's actual side rather than the order request that led to it.
            let position_before = self.ledger.qty_signed(&snap.symbol);
            let reducing = match snap.side {
                ExecSide::Sell => position_before > 0,
                ExecSide::Buy => position_before < 0,
            };
            let fill = to_portfolio_fill(&snap);
            let _ = self.ledger.append_fill(fill);
            self.pdt.record_fill(&snap.symbol, pdt::day_id(now), !reducing);
            self.pending_updates.entry(strategy.id.clone()).or_default().push(to_order_update(&snap));
        }
    }

    /// Bounds `recent_orders`' memory by dropping entries older than the
    /// policy's duplicate-detection window — a long-running engine can't
    /// keep every order it has ever seen, unlike a bounded backtest replay.
    fn prune_recent_orders(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::seconds(self.policy.duplicate_window_seconds.max(0));
        self.recent_orders.retain(|o| now - o.submitted_at <= window);
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
