//! Conversion between the domain `Strategy` (`mqk-strategy`) and its wire
//! form (`mqk-schemas::WireStrategy`). Money fields cross this boundary as
//! decimal strings, never `f64` — see `mqk_schemas::decimal_to_micros`.

use mqk_execution::Side;
use mqk_schemas::{decimal_to_micros, micros_to_decimal, DecimalError, WireGridLevel, WireRuntimeState, WireStrategy, WireVariantParams};
use mqk_strategy::{canonical_variant_name, GridLevel, Phase, RuntimeState, Strategy, VariantParams};

use crate::StoreError;

/// Failure converting a wire record's fields into their domain form — either
/// a decimal string that didn't parse, or an enum tag (side, phase, variant)
/// with no known mapping. Kept local to this module; callers fold it into
/// `StoreError::InvalidRecord` at the `from_wire` boundary.
enum ConvertError {
    Decimal(DecimalError),
    UnknownSide(String),
}

impl From<DecimalError> for ConvertError {
    fn from(e: DecimalError) -> Self {
        ConvertError::Decimal(e)
    }
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::Decimal(e) => write!(f, "{e}"),
            ConvertError::UnknownSide(s) => write!(f, "unknown side {s}"),
        }
    }
}

pub fn to_wire(s: &Strategy) -> WireStrategy {
    WireStrategy {
        id: s.id.clone(),
        symbol: s.symbol.clone(),
        quantity: s.quantity,
        entry_price: s.entry_price_micros.map(micros_to_decimal),
        variant_params: variant_to_wire(&s.variant_params),
        phase: phase_to_wire(s.phase).to_string(),
        enabled: s.enabled,
        schedule_at: s.schedule_at,
        schedule_enabled: s.schedule_enabled,
        runtime_state: runtime_state_to_wire(&s.runtime_state),
        created_at: s.created_at,
        updated_at: s.updated_at,
    }
}

pub fn from_wire(w: &WireStrategy) -> Result<Strategy, StoreError> {
    Ok(Strategy {
        id: w.id.clone(),
        symbol: w.symbol.clone(),
        quantity: w.quantity,
        entry_price_micros: w.entry_price.as_deref().map(parse_price).transpose().map_err(|e| invalid(&w.id, e.into()))?,
        variant_params: variant_from_wire(&w.variant_params).map_err(|e| invalid(&w.id, e))?,
        phase: phase_from_wire(&w.phase).ok_or_else(|| StoreError::InvalidRecord { id: w.id.clone(), reason: format!("unknown phase {}", w.phase) })?,
        enabled: w.enabled,
        schedule_at: w.schedule_at,
        schedule_enabled: w.schedule_enabled,
        runtime_state: runtime_state_from_wire(&w.runtime_state).map_err(|e| invalid(&w.id, e))?,
        created_at: w.created_at,
        updated_at: w.updated_at,
    })
}

fn parse_price(s: &str) -> Result<i64, DecimalError> {
    decimal_to_micros(s)
}

fn invalid(id: &str, e: ConvertError) -> StoreError {
    StoreError::InvalidRecord { id: id.to_string(), reason: e.to_string() }
}

fn phase_to_wire(p: Phase) -> &'static str {
    match p {
        Phase::Pending => "pending",
        Phase::EntryActive => "entry_active",
        Phase::PositionOpen => "position_open",
        Phase::Exiting => "exiting",
        Phase::Completed => "completed",
        Phase::Cancelled => "cancelled",
    }
}

fn phase_from_wire(s: &str) -> Option<Phase> {
    match s {
        "pending" => Some(Phase::Pending),
        "entry_active" => Some(Phase::EntryActive),
        "position_open" => Some(Phase::PositionOpen),
        "exiting" => Some(Phase::Exiting),
        "completed" => Some(Phase::Completed),
        "cancelled" => Some(Phase::Cancelled),
        _ => None,
    }
}

fn variant_to_wire(v: &VariantParams) -> WireVariantParams {
    match v {
        VariantParams::TrailingStop { trailing_bps } => WireVariantParams::TrailingStop { trailing_bps: *trailing_bps },
        VariantParams::Bracket { tp_bps, sl_bps } => WireVariantParams::Bracket { tp_bps: *tp_bps, sl_bps: *sl_bps },
        VariantParams::ScaleOut { rungs_bps, fractions_bps } => {
            WireVariantParams::ScaleOut { rungs_bps: rungs_bps.clone(), fractions_bps: fractions_bps.clone() }
        }
        VariantParams::Grid { reference_price_micros, spacing_bps, levels } => WireVariantParams::Grid {
            reference_price: micros_to_decimal(*reference_price_micros),
            spacing_bps: *spacing_bps,
            levels: *levels,
        },
        VariantParams::PullbackTrailing { pullback_bps, trailing_bps } => {
            WireVariantParams::PullbackTrailing { pullback_bps: *pullback_bps, trailing_bps: *trailing_bps }
        }
    }
}

fn variant_from_wire(w: &WireVariantParams) -> Result<VariantParams, ConvertError> {
    Ok(match w {
        WireVariantParams::TrailingStop { trailing_bps } => VariantParams::TrailingStop { trailing_bps: *trailing_bps },
        WireVariantParams::Bracket { tp_bps, sl_bps } => VariantParams::Bracket { tp_bps: *tp_bps, sl_bps: *sl_bps },
        WireVariantParams::ScaleOut { rungs_bps, fractions_bps } => {
            VariantParams::ScaleOut { rungs_bps: rungs_bps.clone(), fractions_bps: fractions_bps.clone() }
        }
        WireVariantParams::Grid { reference_price, spacing_bps, levels } => VariantParams::Grid {
            reference_price_micros: decimal_to_micros(reference_price)?,
            spacing_bps: *spacing_bps,
            levels: *levels,
        },
        WireVariantParams::PullbackTrailing { pullback_bps, trailing_bps } => {
            VariantParams::PullbackTrailing { pullback_bps: *pullback_bps, trailing_bps: *trailing_bps }
        }
    })
}

fn side_to_wire(s: Side) -> &'static str {
    match s {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn side_from_wire(s: &str) -> Option<Side> {
    match s {
        "buy" => Some(Side::Buy),
        "sell" => Some(Side::Sell),
        _ => None,
    }
}

fn runtime_state_to_wire(r: &RuntimeState) -> WireRuntimeState {
    WireRuntimeState {
        entry_fill_price: r.entry_fill_price_micros.map(micros_to_decimal),
        high_watermark: r.high_watermark_micros.map(micros_to_decimal),
        entry_order_id: r.entry_order_id.clone(),
        tp_order_id: r.tp_order_id.clone(),
        sl_order_id: r.sl_order_id.clone(),
        oco_peer_cancel_attempts: r.oco_peer_cancel_attempts,
        oco_desync: r.oco_desync,
        oco_filled_leg_id: r.oco_filled_leg_id.clone(),
        rung_order_ids: r.rung_order_ids.clone(),
        rungs_filled: r.rungs_filled.clone(),
        grid_levels: r.grid_levels.iter().map(grid_level_to_wire).collect(),
        grid_refill_due: r.grid_refill_due.clone(),
        pre_entry_high: r.pre_entry_high_micros.map(micros_to_decimal),
    }
}

fn runtime_state_from_wire(w: &WireRuntimeState) -> Result<RuntimeState, ConvertError> {
    Ok(RuntimeState {
        entry_fill_price_micros: w.entry_fill_price.as_deref().map(decimal_to_micros).transpose()?,
        high_watermark_micros: w.high_watermark.as_deref().map(decimal_to_micros).transpose()?,
        entry_order_id: w.entry_order_id.clone(),
        tp_order_id: w.tp_order_id.clone(),
        sl_order_id: w.sl_order_id.clone(),
        oco_peer_cancel_attempts: w.oco_peer_cancel_attempts,
        oco_desync: w.oco_desync,
        oco_filled_leg_id: w.oco_filled_leg_id.clone(),
        rung_order_ids: w.rung_order_ids.clone(),
        rungs_filled: w.rungs_filled.clone(),
        grid_levels: w.grid_levels.iter().map(grid_level_from_wire).collect::<Result<_, _>>()?,
        grid_refill_due: w.grid_refill_due.clone(),
        pre_entry_high_micros: w.pre_entry_high.as_deref().map(decimal_to_micros).transpose()?,
    })
}

fn grid_level_to_wire(g: &GridLevel) -> WireGridLevel {
    WireGridLevel {
        price: micros_to_decimal(g.price_micros),
        side: side_to_wire(g.side).to_string(),
        order_client_id: g.order_client_id.clone(),
        filled: g.filled,
    }
}

fn grid_level_from_wire(w: &WireGridLevel) -> Result<GridLevel, ConvertError> {
    Ok(GridLevel {
        price_micros: decimal_to_micros(&w.price)?,
        side: side_from_wire(&w.side).ok_or_else(|| ConvertError::UnknownSide(w.side.clone()))?,
        order_client_id: w.order_client_id.clone(),
        filled: w.filled,
    })
}

/// Rewrites a raw wire JSON object's `variant_params.variant` tag to its
/// canonical snake_case form before it's handed to serde, so a store file
/// written with hyphenated aliases still deserializes.
pub fn canonicalize_variant_tag(value: &mut serde_json::Value) -> Result<(), StoreError> {
    let Some(obj) = value.as_object_mut() else { return Ok(()) };
    let Some(vp) = obj.get_mut("variant_params").and_then(|v| v.as_object_mut()) else { return Ok(()) };
    let Some(tag) = vp.get("variant").and_then(|v| v.as_str()).map(str::to_string) else { return Ok(()) };
    let canonical = canonical_variant_name(&tag).ok_or_else(|| StoreError::InvalidRecord {
        id: obj.get("id").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
        reason: format!("unknown strategy variant {tag}"),
    })?;
    vp.insert("variant".to_string(), serde_json::Value::String(canonical.to_string()));
    Ok(())
}
