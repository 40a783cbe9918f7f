//! FINRA Pattern Day Trader (PDT) enforcement.
//!
//! Rule 4210 defines a *pattern day trader* as any customer who executes four
//! or more *day trades* within five business days, provided the day trades
//! are more than six percent of the account's total trades in that window. A
//! flagged PDT account must maintain $25,000 minimum equity; otherwise the
//! broker restricts the account to closing-only orders.
//!
//! This module is a self-contained rolling-window tracker, deliberately
//! separate from the Safety Gate's fixed evaluation order in `engine.rs`: the
//! gate only consumes the resulting [`PdtContext`] via [`to_pdt_context`].
//! All arithmetic uses `u32` day-trade counts and `i64` micros; no floats.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::PdtContext;

/// FINRA threshold: four or more day trades in five business days triggers PDT.
pub const PDT_DAY_TRADE_THRESHOLD: u32 = 4;

/// FINRA minimum equity to trade when flagged PDT (micros).
pub const PDT_MIN_EQUITY_MICROS: i64 = 25_000 * crate::MICROS_SCALE;

/// Default rolling window width in trading days.
pub const PDT_DEFAULT_WINDOW_DAYS: u32 = 5;

/// PDT enforcement policy configuration, independent of [`crate::PolicyConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtPolicy {
    pub enabled: bool,
    pub window_days: u32,
    /// Max day trades permitted in the window before the account is
    /// restricted. FINRA's threshold is 4 (i.e. reaching 4 triggers PDT), so
    /// this is `PDT_DAY_TRADE_THRESHOLD - 1` under `finra_defaults`.
    pub max_day_trades_in_window: u32,
    pub min_equity_micros: i64,
}

impl PdtPolicy {
    pub fn finra_defaults() -> Self {
        Self {
            enabled: true,
            window_days: PDT_DEFAULT_WINDOW_DAYS,
            max_day_trades_in_window: PDT_DAY_TRADE_THRESHOLD - 1,
            min_equity_micros: PDT_MIN_EQUITY_MICROS,
        }
    }

    /// Enforcement off — for paper/backtest runs, where PDT accounting does
    /// not apply.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            window_days: PDT_DEFAULT_WINDOW_DAYS,
            max_day_trades_in_window: u32::MAX,
            min_equity_micros: 0,
        }
    }
}

/// Mutable PDT state carried across evaluations, keyed by day ID so the
/// rolling window is computed deterministically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtState {
    /// Day-trade count per trading day (`YYYYMMDD` or any monotonic id).
    pub day_trade_counts: BTreeMap<u32, u32>,
    pub flagged_pdt: bool,
}

impl PdtState {
    pub fn new() -> Self {
        Self {
            day_trade_counts: BTreeMap::new(),
            flagged_pdt: false,
        }
    }
}

impl Default for PdtState {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs for one PDT evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtInput {
    pub day_id: u32,
    pub equity_micros: i64,
    /// `true` if the trade being proposed would count as a same-session
    /// open-then-close under FINRA's day-trade definition. The caller tracks
    /// this; the PDT module only records and counts it.
    pub is_day_trade: bool,
}

/// Outcome of a PDT evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtDecision {
    pub trading_allowed: bool,
    pub reason: PdtReason,
    pub window_day_trade_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PdtReason {
    EnforcementDisabled,
    AllowedWithinLimit,
    AllowedNotDayTrade,
    BlockedWouldExceedLimit,
    BlockedFlaggedBelowMinEquity,
    BlockedFlaggedPdt,
}

fn rolling_count(counts: &BTreeMap<u32, u32>, current_day_id: u32, window_days: u32) -> u32 {
    if window_days == 0 {
        return 0;
    }
    let floor = current_day_id.saturating_sub(window_days - 1);
    counts.range(floor..=current_day_id).map(|(_, &v)| v).sum()
}

/// Prune entries outside the rolling window.
pub fn prune_old_days(state: &mut PdtState, current_day_id: u32, window_days: u32) {
    if window_days == 0 {
        state.day_trade_counts.clear();
        return;
    }
    let floor = current_day_id.saturating_sub(window_days - 1);
    state.day_trade_counts.retain(|&k, _| k >= floor);
}

/// Prune stale entries ahead of evaluation. Call once per cycle before
/// [`evaluate_pdt`] so the rolling window is always clean.
pub fn tick_pdt(policy: &PdtPolicy, state: &mut PdtState, input: &PdtInput) {
    prune_old_days(state, input.day_id, policy.window_days);
}

/// Evaluate whether a proposed trade is allowed under PDT rules. Pure — does
/// not mutate `state`; call [`record_day_trade`] separately once the trade
/// actually fills.
pub fn evaluate_pdt(policy: &PdtPolicy, state: &PdtState, input: &PdtInput) -> PdtDecision {
    if !policy.enabled {
        return PdtDecision {
            trading_allowed: true,
            reason: PdtReason::EnforcementDisabled,
            window_day_trade_count: rolling_count(
                &state.day_trade_counts,
                input.day_id,
                policy.window_days,
            ),
        };
    }

    let window_count = rolling_count(&state.day_trade_counts, input.day_id, policy.window_days);

    if state.flagged_pdt {
        let reason = if input.equity_micros < policy.min_equity_micros {
            PdtReason::BlockedFlaggedBelowMinEquity
        } else {
            PdtReason::BlockedFlaggedPdt
        };
        return PdtDecision {
            trading_allowed: false,
            reason,
            window_day_trade_count: window_count,
        };
    }

    if !input.is_day_trade {
        return PdtDecision {
            trading_allowed: true,
            reason: PdtReason::AllowedNotDayTrade,
            window_day_trade_count: window_count,
        };
    }

    let projected = window_count.saturating_add(1);
    if projected > policy.max_day_trades_in_window {
        return PdtDecision {
            trading_allowed: false,
            reason: PdtReason::BlockedWouldExceedLimit,
            window_day_trade_count: window_count,
        };
    }

    PdtDecision {
        trading_allowed: true,
        reason: PdtReason::AllowedWithinLimit,
        window_day_trade_count: window_count,
    }
}

/// Record that a day trade occurred on `day_id`. Call after the trade fills,
/// not on intention, so counts reflect reality. Flags the account once the
/// rolling count exceeds the policy's threshold.
pub fn record_day_trade(policy: &PdtPolicy, state: &mut PdtState, day_id: u32) {
    *state.day_trade_counts.entry(day_id).or_insert(0) += 1;

    let window_count = rolling_count(&state.day_trade_counts, day_id, policy.window_days);
    if window_count > policy.max_day_trades_in_window {
        state.flagged_pdt = true;
    }
}

/// Explicitly clear the PDT flag (e.g. after equity is restored and the
/// broker clears the account to trade again). Day-trade counts are untouched.
pub fn clear_pdt_flag(state: &mut PdtState) {
    state.flagged_pdt = false;
}

/// Bridge a [`PdtDecision`] into the [`PdtContext`] the Safety Gate expects.
pub fn to_pdt_context(decision: &PdtDecision) -> PdtContext {
    PdtContext {
        pdt_ok: decision.trading_allowed,
    }
}

/// `YYYYMMDD` day id for a UTC timestamp, the key [`PdtState`]'s rolling
/// window counts against.
pub fn day_id(ts: DateTime<Utc>) -> u32 {
    ts.format("%Y%m%d").to_string().parse().expect("chrono %Y%m%d is always 8 ascii digits")
}

/// Maintains day-trade history from fill events so a caller (`Engine`,
/// `BacktestEngine`) never has to touch [`PdtState`]'s bookkeeping or decide
/// `is_day_trade` itself. Tracks, per symbol and day, whether an opening fill
/// has already been observed; a closing fill on the same symbol the same day
/// both completes the day trade and records it against the rolling window.
#[derive(Clone, Debug)]
pub struct DayTradeLedger {
    policy: PdtPolicy,
    state: PdtState,
    opened_today: BTreeSet<(String, u32)>,
}

impl DayTradeLedger {
    pub fn new(policy: PdtPolicy) -> Self {
        Self { policy, state: PdtState::new(), opened_today: BTreeSet::new() }
    }

    pub fn state(&self) -> &PdtState {
        &self.state
    }

    /// Evaluate a proposed order on `symbol`/`day_id`, deciding `is_day_trade`
    /// from whether an opening fill is already on record for the same symbol
    /// and day and this order would close rather than open. Call once per
    /// proposed order, immediately before the Safety Gate.
    pub fn context_for(&mut self, symbol: &str, day_id: u32, equity_micros: i64, order_is_opening: bool) -> PdtContext {
        let is_day_trade = !order_is_opening && self.opened_today.contains(&(symbol.to_string(), day_id));
        let input = PdtInput { day_id, equity_micros, is_day_trade };
        tick_pdt(&self.policy, &mut self.state, &input);
        to_pdt_context(&evaluate_pdt(&self.policy, &self.state, &input))
    }

    /// Record a fill's effect on day-trade history. An opening fill marks the
    /// symbol open for `day_id`; a closing fill that matches an earlier
    /// same-day open consumes the mark and records the day trade. Call only
    /// after the fill has actually applied to the ledger, not on intention.
    pub fn record_fill(&mut self, symbol: &str, day_id: u32, is_opening: bool) {
        let key = (symbol.to_string(), day_id);
        if is_opening {
            self.opened_today.insert(key);
        } else if self.opened_today.remove(&key) {
            record_day_trade(&self.policy, &mut self.state, day_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PdtPolicy {
        PdtPolicy::finra_defaults()
    }

    fn state() -> PdtState {
        PdtState::new()
    }

    fn input(day_id: u32, equity_micros: i64, is_day_trade: bool) -> PdtInput {
        PdtInput {
            day_id,
            equity_micros,
            is_day_trade,
        }
    }

    const DAY1: u32 = 20260210;
    const DAY2: u32 = 20260211;
    const DAY3: u32 = 20260212;
    const DAY4: u32 = 20260213;
    const DAY5: u32 = 20260214;
    const DAY6: u32 = 20260217;

    const EQUITY_OK: i64 = 30_000 * crate::MICROS_SCALE;
    const EQUITY_LOW: i64 = 10_000 * crate::MICROS_SCALE;

    #[test]
    fn disabled_policy_always_allows() {
        let p = PdtPolicy::disabled();
        let s = state();
        let d = evaluate_pdt(&p, &s, &input(DAY1, EQUITY_LOW, true));
        assert!(d.trading_allowed);
        assert_eq!(d.reason, PdtReason::EnforcementDisabled);
    }

    #[test]
    fn non_day_trade_always_allowed() {
        let p = policy();
        let s = state();
        let d = evaluate_pdt(&p, &s, &input(DAY1, EQUITY_OK, false));
        assert!(d.trading_allowed);
        assert_eq!(d.reason, PdtReason::AllowedNotDayTrade);
    }

    #[test]
    fn three_day_trades_in_window_then_fourth_blocked() {
        let p = policy();
        let mut s = state();
        record_day_trade(&p, &mut s, DAY1);
        record_day_trade(&p, &mut s, DAY2);
        record_day_trade(&p, &mut s, DAY3);

        tick_pdt(&p, &mut s, &input(DAY3, EQUITY_OK, true));
        let d = evaluate_pdt(&p, &s, &input(DAY3, EQUITY_OK, true));
        assert!(!d.trading_allowed);
        assert_eq!(d.reason, PdtReason::BlockedWouldExceedLimit);
        assert_eq!(d.window_day_trade_count, 3);
    }

    #[test]
    fn fourth_recorded_day_trade_flags_account() {
        let p = policy();
        let mut s = state();
        record_day_trade(&p, &mut s, DAY1);
        record_day_trade(&p, &mut s, DAY2);
        record_day_trade(&p, &mut s, DAY3);
        record_day_trade(&p, &mut s, DAY4);
        assert!(s.flagged_pdt);
    }

    #[test]
    fn flagged_below_min_equity_vs_above_min_equity_reasons_differ() {
        let p = policy();
        let mut s = state();
        s.flagged_pdt = true;

        let below = evaluate_pdt(&p, &s, &input(DAY1, EQUITY_LOW, true));
        assert_eq!(below.reason, PdtReason::BlockedFlaggedBelowMinEquity);

        let above = evaluate_pdt(&p, &s, &input(DAY1, EQUITY_OK, true));
        assert_eq!(above.reason, PdtReason::BlockedFlaggedPdt);
    }

    #[test]
    fn clear_pdt_flag_allows_trading_again() {
        let p = policy();
        let mut s = state();
        s.flagged_pdt = true;
        clear_pdt_flag(&mut s);
        let d = evaluate_pdt(&p, &s, &input(DAY1, EQUITY_OK, true));
        assert!(d.trading_allowed);
    }

    #[test]
    fn old_day_trades_roll_out_of_window() {
        let p = policy();
        let mut s = state();
        record_day_trade(&p, &mut s, DAY1);
        record_day_trade(&p, &mut s, DAY1);
        record_day_trade(&p, &mut s, DAY1);

        tick_pdt(&p, &mut s, &input(DAY6, EQUITY_OK, true));
        let d = evaluate_pdt(&p, &s, &input(DAY6, EQUITY_OK, true));
        assert!(d.trading_allowed);
        assert_eq!(d.window_day_trade_count, 0);
    }

    #[test]
    fn trades_on_day5_still_in_window_from_day1() {
        let p = policy();
        let mut s = state();
        record_day_trade(&p, &mut s, DAY1);
        record_day_trade(&p, &mut s, DAY5);

        tick_pdt(&p, &mut s, &input(DAY5, EQUITY_OK, true));
        let d = evaluate_pdt(&p, &s, &input(DAY5, EQUITY_OK, true));
        assert_eq!(d.window_day_trade_count, 2);
    }

    #[test]
    fn to_pdt_context_bridges_decision() {
        let decision = PdtDecision {
            trading_allowed: false,
            reason: PdtReason::BlockedWouldExceedLimit,
            window_day_trade_count: 4,
        };
        assert!(!to_pdt_context(&decision).pdt_ok);
    }

    #[test]
    fn day_id_formats_as_yyyymmdd() {
        let ts = DateTime::parse_from_rfc3339("2026-02-10T09:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(day_id(ts), 20260210);
    }

    #[test]
    fn day_trade_ledger_does_not_flag_an_opening_fill_alone() {
        let mut ledger = DayTradeLedger::new(policy());
        let ctx = ledger.context_for("AAPL", DAY1, EQUITY_OK, true);
        assert!(ctx.pdt_ok);
        ledger.record_fill("AAPL", DAY1, true);
        assert!(ledger.state().day_trade_counts.is_empty());
    }

    #[test]
    fn day_trade_ledger_counts_a_same_day_open_then_close() {
        let mut ledger = DayTradeLedger::new(policy());
        ledger.record_fill("AAPL", DAY1, true);

        let ctx = ledger.context_for("AAPL", DAY1, EQUITY_OK, false);
        assert!(ctx.pdt_ok);
        ledger.record_fill("AAPL", DAY1, false);

        assert_eq!(ledger.state().day_trade_counts.get(&DAY1), Some(&1));
    }

    #[test]
    fn day_trade_ledger_blocks_a_fourth_same_day_round_trip_in_window() {
        let mut ledger = DayTradeLedger::new(policy());
        for day in [DAY1, DAY2, DAY3] {
            ledger.record_fill("AAPL", day, true);
            ledger.record_fill("AAPL", day, false);
        }

        let ctx = ledger.context_for("AAPL", DAY3, EQUITY_OK, true);
        assert!(ctx.pdt_ok, "opening leg of the fourth round trip is not itself a day trade");
        ledger.record_fill("AAPL", DAY3, true);

        let ctx = ledger.context_for("AAPL", DAY3, EQUITY_OK, false);
        assert!(!ctx.pdt_ok, "closing the fourth same-day round trip within the window must be blocked");
    }

    #[test]
    fn day_trade_ledger_does_not_count_a_close_with_no_matching_open() {
        let mut ledger = DayTradeLedger::new(policy());
        let ctx = ledger.context_for("AAPL", DAY1, EQUITY_OK, false);
        assert!(ctx.pdt_ok);
        ledger.record_fill("AAPL", DAY1, false);
        assert!(ledger.state().day_trade_counts.is_empty());
    }
}
