use chrono::{DateTime, Utc};
use mqk_execution::OrderStatus;
use mqk_strategy::{evaluate, Action, MarketSnapshot, OrderUpdate, Phase, RuntimeState, Strategy, VariantParams};

fn t(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn snap(price: i64, minute: u32) -> MarketSnapshot {
    MarketSnapshot {
        symbol: "AAPL".to_string(),
        last_micros: price,
        bar_high_micros: Some(price),
        bar_low_micros: Some(price),
        ts_utc: t(&format!("2026-01-01T00:{minute:02}:00Z")),
    }
}

#[test]
fn single_winner_trailing_stop_exits_on_pullback() {
    const M: i64 = 1_000_000;
    let mut strat = Strategy {
        id: "t1".to_string(),
        symbol: "AAPL".to_string(),
        quantity: 5,
        entry_price_micros: None,
        variant_params: VariantParams::TrailingStop { trailing_bps: 500 },
        phase: Phase::Pending,
        enabled: true,
        schedule_at: None,
        schedule_enabled: false,
        runtime_state: RuntimeState::default(),
        created_at: t("2026-01-01T00:00:00Z"),
        updated_at: t("2026-01-01T00:00:00Z"),
    };

    let (s1, a1) = evaluate(&strat, &snap(100 * M, 1), &[]);
    let entry_id = match a1 {
        Action::Submit(o) => o.client_id,
        _ => panic!("expected entry submit"),
    };
    strat = s1;

    let fill = OrderUpdate { client_id: entry_id, status: OrderStatus::Filled, filled_qty: 5, avg_fill_price_micros: 100 * M };
    let (s2, _) = evaluate(&strat, &snap(110 * M, 2), &[fill]);
    strat = s2;
    assert_eq!(strat.phase, Phase::PositionOpen);

    let (s3, _) = evaluate(&strat, &snap(120 * M, 3), &[]);
    strat = s3;
    assert_eq!(strat.runtime_state.high_watermark_micros, Some(120 * M));

    let (s4, a4) = evaluate(&strat, &snap(110 * M, 4), &[]);
    assert!(matches!(a4, Action::Submit(_)), "trigger at 114 should fire on a close of 110");
    assert_eq!(s4.phase, Phase::Exiting);
}
