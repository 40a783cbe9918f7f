use chrono::{DateTime, Utc};
use mqk_execution::OrderStatus;
use mqk_strategy::{cancel, desync_error, evaluate, Action, MarketSnapshot, OrderUpdate, Phase, RuntimeState, Strategy, VariantParams};

fn t(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn snap(price: i64) -> MarketSnapshot {
    MarketSnapshot {
        symbol: "AAPL".to_string(),
        last_micros: price,
        bar_high_micros: Some(price),
        bar_low_micros: Some(price),
        ts_utc: t("2026-01-01T00:01:00Z"),
    }
}

fn strategy() -> Strategy {
    Strategy {
        id: "b1".to_string(),
        symbol: "AAPL".to_string(),
        quantity: 10,
        entry_price_micros: None,
        variant_params: VariantParams::Bracket { tp_bps: 1_000, sl_bps: 500 },
        phase: Phase::Pending,
        enabled: true,
        schedule_at: None,
        schedule_enabled: false,
        runtime_state: RuntimeState::default(),
        created_at: t("2026-01-01T00:00:00Z"),
        updated_at: t("2026-01-01T00:00:00Z"),
    }
}

#[test]
fn tp_then_sl_placed_sequentially_and_tp_wins() {
    const M: i64 = 1_000_000;
    let mut strat = strategy();

    let (s1, a1) = evaluate(&strat, &snap(100 * M), &[]);
    let entry_id = match a1 {
        Action::Submit(o) => o.client_id,
        _ => panic!("expected entry submit"),
    };
    strat = s1;

    let entry_fill = OrderUpdate { client_id: entry_id, status: OrderStatus::Filled, filled_qty: 10, avg_fill_price_micros: 100 * M };
    let (s2, _) = evaluate(&strat, &snap(100 * M), &[entry_fill]);
    strat = s2;
    assert_eq!(strat.phase, Phase::PositionOpen);

    let (s3, a3) = evaluate(&strat, &snap(100 * M), &[]);
    assert!(matches!(a3, Action::Submit(_)));
    strat = s3;
    assert!(strat.runtime_state.tp_order_id.is_some());
    assert!(strat.runtime_state.sl_order_id.is_none());

    let (s4, a4) = evaluate(&strat, &snap(100 * M), &[]);
    assert!(matches!(a4, Action::Submit(_)));
    strat = s4;
    assert!(strat.runtime_state.sl_order_id.is_some());

    let tp_id = strat.runtime_state.tp_order_id.clone().unwrap();
    let sl_id = strat.runtime_state.sl_order_id.clone().unwrap();

    let tp_fill = OrderUpdate { client_id: tp_id, status: OrderStatus::Filled, filled_qty: 10, avg_fill_price_micros: 110 * M };
    let (s5, a5) = evaluate(&strat, &snap(110 * M), &[tp_fill]);
    assert_eq!(a5, Action::Cancel { client_id: sl_id.clone() });
    strat = s5;
    assert_eq!(strat.phase, Phase::Exiting);

    let sl_cancelled = OrderUpdate { client_id: sl_id, status: OrderStatus::Cancelled, filled_qty: 0, avg_fill_price_micros: 0 };
    let (s6, a6) = evaluate(&strat, &snap(110 * M), &[sl_cancelled]);
    assert_eq!(a6, Action::NoOp);
    assert_eq!(s6.phase, Phase::Completed);
    assert!(desync_error(&s6).is_none());
}

#[test]
fn external_cancel_during_position_open_targets_tp_leg() {
    let mut rs = RuntimeState::default();
    rs.entry_fill_price_micros = Some(100_000_000);
    rs.tp_order_id = Some("b1-tp".to_string());
    let mut strat = strategy();
    strat.phase = Phase::PositionOpen;
    strat.runtime_state = rs;

    let (next, action) = cancel(&strat);
    assert_eq!(next.phase, Phase::Cancelled);
    assert_eq!(action, Action::Cancel { client_id: "b1-tp".to_string() });
}
