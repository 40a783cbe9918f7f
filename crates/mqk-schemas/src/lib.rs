//! mqk-schemas
//!
//! Wire-boundary shapes shared by the strategy store and the backtest CSV
//! loader. OHLCV and money fields are carried as `String` at this boundary
//! (not `f64`) so that JSON/CSV round-trips never introduce float drift;
//! callers convert to integer micros via [`decimal_to_micros`] immediately
//! after parsing and never hold a wire shape past that point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of a Bar CSV file (header `timestamp,open,high,low,close,volume`),
/// deserialized by `csv`'s serde support. No symbol column: a Bar CSV file is
/// one symbol's history, and the caller supplies the symbol. `timestamp`
/// stays a raw `String` rather than `DateTime<Utc>` because the format
/// accepts either RFC3339 or a bare `YYYY-MM-DD HH:MM:SS`, and chrono's own
/// deserializer only accepts the former.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBar {
    pub timestamp: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

/// One persisted strategy record, as the store reads and writes it. Money
/// fields are decimal strings for the same reason as [`WireBar`]; percentages
/// stay plain basis-point integers since they carry no fractional-cent risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStrategy {
    pub id: String,
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: Option<String>,
    pub variant_params: WireVariantParams,
    pub phase: String,
    pub enabled: bool,
    pub schedule_at: Option<DateTime<Utc>>,
    pub schedule_enabled: bool,
    #[serde(default)]
    pub runtime_state: WireRuntimeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum WireVariantParams {
    TrailingStop { trailing_bps: i64 },
    Bracket { tp_bps: i64, sl_bps: i64 },
    ScaleOut { rungs_bps: Vec<i64>, fractions_bps: Vec<i64> },
    Grid { reference_price: String, spacing_bps: i64, levels: u32 },
    PullbackTrailing { pullback_bps: i64, trailing_bps: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WireRuntimeState {
    pub entry_fill_price: Option<String>,
    pub high_watermark: Option<String>,
    pub entry_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    #[serde(default)]
    pub oco_peer_cancel_attempts: u32,
    #[serde(default)]
    pub oco_desync: bool,
    pub oco_filled_leg_id: Option<String>,
    #[serde(default)]
    pub rung_order_ids: Vec<Option<String>>,
    #[serde(default)]
    pub rungs_filled: Vec<bool>,
    #[serde(default)]
    pub grid_levels: Vec<WireGridLevel>,
    #[serde(default)]
    pub grid_refill_due: Vec<bool>,
    pub pre_entry_high: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGridLevel {
    pub price: String,
    pub side: String,
    pub order_client_id: Option<String>,
    pub filled: bool,
}

/// Error from [`decimal_to_micros`]: a decimal string that doesn't meet the
/// wire boundary's no-floats parsing contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    Empty,
    Negative,
    InvalidWholePart,
    InvalidFractionalPart,
    TooManyFractionalDigits,
    Overflow,
}

impl std::fmt::Display for DecimalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecimalError::Empty => write!(f, "empty decimal string"),
            DecimalError::Negative => write!(f, "negative price not allowed"),
            DecimalError::InvalidWholePart => write!(f, "invalid whole-number digits"),
            DecimalError::InvalidFractionalPart => write!(f, "invalid fractional digits"),
            DecimalError::TooManyFractionalDigits => write!(f, "more than 6 fractional digits"),
            DecimalError::Overflow => write!(f, "price overflows i64 micros"),
        }
    }
}

impl std::error::Error for DecimalError {}

/// Parse a decimal price string ("150.50") into integer micros, deterministically
/// and without ever routing the value through `f64`. Up to 6 fractional digits
/// are accepted; fewer are right-padded with zeros.
pub fn decimal_to_micros(s: &str) -> Result<i64, DecimalError> {
    let raw = s.trim();
    if raw.is_empty() {
        return Err(DecimalError::Empty);
    }
    if raw.starts_with('-') {
        return Err(DecimalError::Negative);
    }
    let raw = raw.strip_prefix('+').unwrap_or(raw);

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() > 2 {
        return Err(DecimalError::InvalidWholePart);
    }

    let whole = parts[0];
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(DecimalError::InvalidWholePart);
    }
    let whole_i: i64 = whole.parse().map_err(|_| DecimalError::Overflow)?;
    let whole_m = whole_i.checked_mul(1_000_000).ok_or(DecimalError::Overflow)?;

    let frac_m = if parts.len() == 2 {
        let frac = parts[1];
        if frac.is_empty() {
            0
        } else {
            if !frac.chars().all(|c| c.is_ascii_digit()) {
                return Err(DecimalError::InvalidFractionalPart);
            }
            if frac.len() > 6 {
                return Err(DecimalError::TooManyFractionalDigits);
            }
            let mut padded = frac.to_string();
            while padded.len() < 6 {
                padded.push('0');
            }
            padded.parse().map_err(|_| DecimalError::Overflow)?
        }
    } else {
        0
    };

    whole_m.checked_add(frac_m).ok_or(DecimalError::Overflow)
}

/// Format integer micros back to a decimal string with exactly 6 fractional
/// digits, the inverse of [`decimal_to_micros`].
pub fn micros_to_decimal(micros: i64) -> String {
    let whole = micros / 1_000_000;
    let frac = (micros % 1_000_000).abs();
    format!("{whole}.{frac:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_round_trips_through_micros() {
        assert_eq!(decimal_to_micros("150.50").unwrap(), 150_500_000);
        assert_eq!(micros_to_decimal(150_500_000), "150.500000");
    }

    #[test]
    fn decimal_rejects_too_many_fractional_digits() {
        assert_eq!(decimal_to_micros("1.1234567"), Err(DecimalError::TooManyFractionalDigits));
    }

    #[test]
    fn decimal_rejects_negative() {
        assert_eq!(decimal_to_micros("-1.5"), Err(DecimalError::Negative));
    }

    #[test]
    fn decimal_pads_short_fractional_part() {
        assert_eq!(decimal_to_micros("1.5").unwrap(), 1_500_000);
    }
}
