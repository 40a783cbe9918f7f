//! Order Router: the deterministic boundary between the evaluator and the
//! broker capability.
//!
//! This module isolates strategy/risk/accounting concerns from broker
//! specifics so the same router logic runs unchanged against a live adapter
//! or the historical fill simulator. It is deliberately thin: validation and
//! policy decisions happen in the Safety Gate before an order ever reaches
//! here; this layer only translates, idempotency-checks, and delegates.

use std::collections::BTreeMap;

use mqk_audit::AuditWriter;
use uuid::Uuid;

use crate::types::{Order, OrderSnapshot, Quote, RouterError};

/// Trait every broker adapter (live or historical) must implement.
pub trait BrokerAdapter {
    fn submit(&mut self, order: Order) -> Result<OrderSnapshot, RouterError>;
    fn cancel(&mut self, client_id: &str) -> Result<OrderSnapshot, RouterError>;
    fn status(&self, client_id: &str) -> Result<OrderSnapshot, RouterError>;
    fn quote(&self, symbol: &str) -> Result<Quote, RouterError>;
}

/// Routes orders to a single injected broker adapter, enforcing the
/// idempotency guarantee the spec's Order Router contract requires:
/// resubmitting a previously seen `client_id` returns the existing snapshot
/// rather than duplicating the order at the broker.
pub struct OrderRouter<B: BrokerAdapter> {
    broker: B,
    seen: BTreeMap<String, OrderSnapshot>,
    audit: Option<(AuditWriter, Uuid)>,
    /// Count of audit-append failures. A write failure marks the router
    /// unhealthy but never unwinds the broker call it was recording — the
    /// action stands, and broker state remains the source of truth for
    /// reconciliation.
    audit_errors: u32,
}

impl<B: BrokerAdapter> OrderRouter<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            seen: BTreeMap::new(),
            audit: None,
            audit_errors: 0,
        }
    }

    /// Wraps `broker` with an audit trail: every state-changing call appends
    /// a record to `writer` before returning, tagged with `run_id`.
    pub fn with_audit(broker: B, writer: AuditWriter, run_id: Uuid) -> Self {
        Self {
            broker,
            seen: BTreeMap::new(),
            audit: Some((writer, run_id)),
            audit_errors: 0,
        }
    }

    pub fn audit_healthy(&self) -> bool {
        self.audit_errors == 0
    }

    fn emit_audit(&mut self, event_type: &str, snapshot: &OrderSnapshot) {
        let Some((writer, run_id)) = self.audit.as_mut() else { return };
        let payload = serde_json::json!({
            "client_id": snapshot.client_id,
            "broker_id": snapshot.broker_id,
            "symbol": snapshot.symbol,
            "status": format!("{:?}", snapshot.status),
            "filled_qty": snapshot.filled_qty,
            "avg_fill_price_micros": snapshot.avg_fill_price_micros,
            "parent_strategy_id": snapshot.parent_strategy_id,
        });
        if let Err(err) = writer.append(*run_id, "ORDER", event_type, payload) {
            self.audit_errors += 1;
            tracing::error!(%err, client_id = %snapshot.client_id, "audit append failed");
        }
    }

    pub fn submit(&mut self, order: Order) -> Result<OrderSnapshot, RouterError> {
        if let Some(existing) = self.seen.get(&order.client_id) {
            return Ok(existing.clone());
        }
        let snapshot = self.broker.submit(order)?;
        self.seen.insert(snapshot.client_id.clone(), snapshot.clone());
        self.emit_audit("SUBMITTED", &snapshot);
        Ok(snapshot)
    }

    pub fn cancel(&mut self, client_id: &str) -> Result<OrderSnapshot, RouterError> {
        let snapshot = self.broker.cancel(client_id)?;
        self.seen.insert(snapshot.client_id.clone(), snapshot.clone());
        self.emit_audit("CANCELLED", &snapshot);
        Ok(snapshot)
    }

    pub fn status(&self, client_id: &str) -> Result<OrderSnapshot, RouterError> {
        self.broker.status(client_id)
    }

    pub fn quote(&self, symbol: &str) -> Result<Quote, RouterError> {
        self.broker.quote(symbol)
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }
}
