//! Exercises a strategy across several real `Engine::tick` calls, driving
//! bars into the historical broker between ticks the way a live run would
//! receive market data between cycles.

use chrono::{DateTime, Utc};
use mqk_audit::AuditWriter;
use mqk_broker_historical::{Bar, HistoricalBroker};
use mqk_risk::PolicyConfig;
use mqk_runtime::{Engine, EngineLock};
use mqk_strategy::{Phase, RuntimeState, Strategy, VariantParams};
use mqk_store::StrategyStore;
use uuid::Uuid;

fn t(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn trailing_strategy(id: &str, created_at: DateTime<Utc>) -> Strategy {
    Strategy {
        id: id.to_string(),
        symbol: "AAPL".to_string(),
        quantity: 10,
        entry_price_micros: None,
        variant_params: VariantParams::TrailingStop { trailing_bps: 500 },
        phase: Phase::Pending,
        enabled: true,
        schedule_at: None,
        schedule_enabled: false,
        runtime_state: RuntimeState::default(),
        created_at,
        updated_at: created_at,
    }
}

fn bar(ts: &str, price_micros: i64) -> Bar {
    Bar {
        symbol: "AAPL".to_string(),
        ts_utc: t(ts),
        open_micros: price_micros,
        high_micros: price_micros,
        low_micros: price_micros,
        close_micros: price_micros,
    }
}

fn engine(dir: &std::path::Path) -> Engine<HistoricalBroker> {
    let store = StrategyStore::new(dir.join("strategies.json"));
    let order_audit = AuditWriter::new(dir.join("orders.jsonl"), true).unwrap();
    let engine_audit = AuditWriter::new(dir.join("engine.jsonl"), true).unwrap();
    Engine::new(
        HistoricalBroker::new(),
        store,
        order_audit,
        engine_audit,
        Uuid::nil(),
        100_000 * 1_000_000,
        PolicyConfig::permissive_for_tests(),
    )
}

const M: i64 = 1_000_000;

/// Entry, a rising watermark, then a pullback that triggers the trailing
/// exit, each transition driven by its own tick against a fresh bar —
/// mirrors the winner scenario in `mqk-strategy`'s evaluator test but
/// through the full engine cycle (store round-trip, router, audit) instead
/// of calling `evaluate` directly.
#[test]
fn trailing_stop_runs_entry_to_exit_across_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = t("2026-01-01T09:30:00Z");

    let store = StrategyStore::new(dir.path().join("strategies.json"));
    store.upsert(&trailing_strategy("s1", t0)).unwrap();

    let mut e = engine(dir.path());

    // Tick 1: entry submitted as a market buy, resting at the broker.
    e.router_mut().broker_mut().advance_bar(&bar("2026-01-01T09:29:00Z", 100 * M));
    let report = e.tick(t0).unwrap();
    assert_eq!(report.orders_submitted, 1);
    let after_entry = store.load("s1").unwrap().unwrap();
    assert_eq!(after_entry.phase, Phase::EntryActive);

    // Tick 2: the next bar fills the resting market order at 100; the
    // engine should see the fill and move to position_open.
    e.router_mut().broker_mut().advance_bar(&bar("2026-01-01T09:31:00Z", 100 * M));
    e.tick(t("2026-01-01T09:32:00Z")).unwrap();
    let after_fill = store.load("s1").unwrap().unwrap();
    assert_eq!(after_fill.phase, Phase::PositionOpen);
    assert_eq!(after_fill.runtime_state.entry_fill_price_micros, Some(100 * M));

    // Tick 3: price rises to 120, watermark follows, no exit yet.
    e.router_mut().broker_mut().advance_bar(&bar("2026-01-01T09:33:00Z", 120 * M));
    e.tick(t("2026-01-01T09:34:00Z")).unwrap();
    let after_rise = store.load("s1").unwrap().unwrap();
    assert_eq!(after_rise.phase, Phase::PositionOpen);
    assert_eq!(after_rise.runtime_state.high_watermark_micros, Some(120 * M));

    // Tick 4: price falls to 110, below 120 * 0.95 = 114 -> exit submitted.
    e.router_mut().broker_mut().advance_bar(&bar("2026-01-01T09:35:00Z", 110 * M));
    let exit_report = e.tick(t("2026-01-01T09:36:00Z")).unwrap();
    assert_eq!(exit_report.orders_submitted, 1);
    let after_exit_submit = store.load("s1").unwrap().unwrap();
    assert_eq!(after_exit_submit.phase, Phase::Exiting);

    // Tick 5: the next bar fills the exit order -> completed.
    e.router_mut().broker_mut().advance_bar(&bar("2026-01-01T09:37:00Z", 110 * M));
    e.tick(t("2026-01-01T09:38:00Z")).unwrap();
    let done = store.load("s1").unwrap().unwrap();
    assert_eq!(done.phase, Phase::Completed);

    assert!(e.quarantined().is_empty());
}

/// A strategy whose symbol has never seen a bar fails `refresh_mark` (no
/// quote to source a mark from) and must be quarantined without blocking a
/// healthy sibling processed in the same tick.
#[test]
fn one_strategy_failing_does_not_block_its_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = t("2026-01-01T09:30:00Z");

    let store = StrategyStore::new(dir.path().join("strategies.json"));
    store.upsert(&trailing_strategy("healthy", t0)).unwrap();

    let mut broken = trailing_strategy("broken", t0);
    broken.symbol = "MSFT".to_string();
    store.upsert(&broken).unwrap();

    let mut e = engine(dir.path());
    e.router_mut().broker_mut().advance_bar(&bar("2026-01-01T09:29:00Z", 100 * M));
    let report = e.tick(t0).unwrap();

    assert_eq!(report.strategies_evaluated, 2);
    assert_eq!(report.strategies_quarantined, 1);
    assert!(e.quarantined().contains_key("broken"));

    let healthy = store.load("healthy").unwrap().unwrap();
    assert_eq!(healthy.phase, Phase::EntryActive);
    let broken_after = store.load("broken").unwrap().unwrap();
    assert_eq!(broken_after.phase, Phase::Pending);
}

#[test]
fn lock_prevents_a_second_engine_on_the_same_directory() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("engine.lock");

    let first = EngineLock::acquire(&lock_path, "engine-a", Utc::now()).unwrap();
    let err = EngineLock::acquire(&lock_path, "engine-b", Utc::now()).unwrap_err();
    assert!(matches!(err, mqk_runtime::LockError::AlreadyHeld { .. }));

    first.release().unwrap();
    let second = EngineLock::acquire(&lock_path, "engine-b", Utc::now()).unwrap();
    second.release().unwrap();
}
