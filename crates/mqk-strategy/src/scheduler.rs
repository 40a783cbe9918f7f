use chrono::{DateTime, Utc};

use crate::types::Strategy;

/// One scheduler transition: a strategy whose `schedule_at` has arrived is
/// atomically enabled and its schedule cleared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationEvent {
    pub strategy_id: String,
    pub activated_at: DateTime<Utc>,
}

/// Apply the schedule-activation transition if `strategy.schedule_at <= now`.
///
/// Returns the (possibly updated) strategy and an activation event to audit
/// if a transition occurred. Scheduling precision is bounded by the caller's
/// tick period; this function only tests the instant it's given.
pub fn activate_if_due(mut strategy: Strategy, now: DateTime<Utc>) -> (Strategy, Option<ActivationEvent>) {
    if !strategy.schedule_enabled {
        return (strategy, None);
    }
    let Some(at) = strategy.schedule_at else {
        return (strategy, None);
    };
    if at > now {
        return (strategy, None);
    }

    strategy.enabled = true;
    strategy.schedule_enabled = false;
    strategy.schedule_at = None;
    strategy.updated_at = now;

    let event = ActivationEvent {
        strategy_id: strategy.id.clone(),
        activated_at: now,
    };
    (strategy, Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, RuntimeState, VariantParams};

    fn strategy_at(schedule_at: Option<DateTime<Utc>>, schedule_enabled: bool) -> Strategy {
        let t0 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Strategy {
            id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 1,
            entry_price_micros: None,
            variant_params: VariantParams::TrailingStop { trailing_bps: 500 },
            phase: Phase::Pending,
            enabled: false,
            schedule_at,
            schedule_enabled,
            runtime_state: RuntimeState::default(),
            created_at: t0,
            updated_at: t0,
        }
    }

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn no_activation_before_schedule() {
        let strat = strategy_at(Some(t("2026-01-02T00:00:00Z")), true);
        let (strat2, event) = activate_if_due(strat, t("2026-01-01T12:00:00Z"));
        assert!(event.is_none());
        assert!(!strat2.enabled);
        assert!(strat2.schedule_enabled);
    }

    #[test]
    fn activates_exactly_at_schedule() {
        let due = t("2026-01-02T00:00:00Z");
        let strat = strategy_at(Some(due), true);
        let (strat2, event) = activate_if_due(strat, due);
        assert!(event.is_some());
        assert!(strat2.enabled);
        assert!(!strat2.schedule_enabled);
        assert!(strat2.schedule_at.is_none());
    }

    #[test]
    fn activates_after_schedule() {
        let strat = strategy_at(Some(t("2026-01-02T00:00:00Z")), true);
        let (strat2, event) = activate_if_due(strat, t("2026-01-02T00:05:00Z"));
        assert!(event.is_some());
        assert!(strat2.enabled);
    }

    #[test]
    fn no_schedule_is_a_no_op() {
        let strat = strategy_at(None, false);
        let (strat2, event) = activate_if_due(strat.clone(), t("2026-01-02T00:00:00Z"));
        assert!(event.is_none());
        assert_eq!(strat2, strat);
    }
}
