//! Loads a symbol's OHLCV history from a Bar CSV file (header
//! `timestamp,open,high,low,close,volume`; rows strictly ascending). The
//! file carries no symbol column, so the caller supplies one per file —
//! callers typically load one file per traded symbol.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use mqk_schemas::{decimal_to_micros, WireBar};

use crate::types::BacktestBar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarLoadError {
    Open(String),
    Row { line: u64, reason: String },
    OutOfOrder { line: u64 },
}

impl std::fmt::Display for BarLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarLoadError::Open(msg) => write!(f, "could not open bar csv: {msg}"),
            BarLoadError::Row { line, reason } => write!(f, "bar csv line {line}: {reason}"),
            BarLoadError::OutOfOrder { line } => write!(f, "bar csv line {line}: timestamp not strictly ascending"),
        }
    }
}

impl std::error::Error for BarLoadError {}

pub fn load_bars_csv(path: impl AsRef<Path>, symbol: &str) -> Result<Vec<BacktestBar>, BarLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())
        .map_err(|e| BarLoadError::Open(e.to_string()))?;

    let mut bars = Vec::new();
    let mut prev_ts: Option<DateTime<Utc>> = None;

    for (idx, result) in reader.deserialize::<WireBar>().enumerate() {
        let line = idx as u64 + 2; // header occupies line 1
        let row = result.map_err(|e| BarLoadError::Row { line, reason: e.to_string() })?;

        let ts_utc = parse_bar_timestamp(&row.timestamp).map_err(|reason| BarLoadError::Row { line, reason })?;
        let open_micros = decimal_to_micros(&row.open).map_err(|e| BarLoadError::Row { line, reason: e.to_string() })?;
        let high_micros = decimal_to_micros(&row.high).map_err(|e| BarLoadError::Row { line, reason: e.to_string() })?;
        let low_micros = decimal_to_micros(&row.low).map_err(|e| BarLoadError::Row { line, reason: e.to_string() })?;
        let close_micros = decimal_to_micros(&row.close).map_err(|e| BarLoadError::Row { line, reason: e.to_string() })?;
        decimal_to_micros(&row.volume).map_err(|e| BarLoadError::Row { line, reason: format!("volume: {e}") })?;

        if let Some(prev) = prev_ts {
            if ts_utc <= prev {
                return Err(BarLoadError::OutOfOrder { line });
            }
        }
        prev_ts = Some(ts_utc);

        bars.push(BacktestBar { symbol: symbol.to_string(), ts_utc, open_micros, high_micros, low_micros, close_micros });
    }

    Ok(bars)
}

/// ISO-8601 timestamps parse as given. A bare `YYYY-MM-DD HH:MM:SS` carries
/// no zone; this system treats it as already-UTC wall-clock rather than
/// resolving a market calendar's local offset, which no dependency in this
/// workspace can do without adding a timezone database crate the rest of
/// the codebase has no other use for.
fn parse_bar_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("unrecognized timestamp {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_rows_with_iso_and_bare_timestamps() {
        let f = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2026-01-01T09:30:00Z,100.00,101.00,99.50,100.50,1000\n\
             2026-01-01 09:31:00,100.50,102.00,100.00,101.75,1200\n",
        );
        let bars = load_bars_csv(f.path(), "AAPL").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].symbol, "AAPL");
        assert_eq!(bars[0].open_micros, 100_000_000);
        assert_eq!(bars[1].close_micros, 101_750_000);
    }

    #[test]
    fn rejects_non_ascending_timestamps() {
        let f = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2026-01-01T09:31:00Z,100,101,99,100,1000\n\
             2026-01-01T09:30:00Z,100,101,99,100,1000\n",
        );
        let err = load_bars_csv(f.path(), "AAPL").unwrap_err();
        assert!(matches!(err, BarLoadError::OutOfOrder { line: 3 }));
    }

    #[test]
    fn rejects_a_malformed_price_field() {
        let f = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2026-01-01T09:30:00Z,not-a-number,101,99,100,1000\n",
        );
        let err = load_bars_csv(f.path(), "AAPL").unwrap_err();
        assert!(matches!(err, BarLoadError::Row { line: 2, .. }));
    }
}
