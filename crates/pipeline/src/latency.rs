//! Latency Instrumentation
//!
//! Three measures are derived from timestamps carried in each record, all
//! in fractional epoch seconds:
//!
//! ```text
//! source_to_pipeline_ms = (processing_timestamp - source_event_time) * 1000
//! pipeline_to_store_ms  = (store_arrival_time   - processing_timestamp) * 1000
//! total_ms              = (store_arrival_time   - source_event_time)  * 1000
//! ```
//!
//! A missing input yields a missing output. The same formulas run as a
//! store trigger (see `migration::builtin`), so rows written by an external
//! sink worker get identical values.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

pub const PROCESSING_TIMESTAMP: &str = "processing_timestamp";
pub const STORE_ARRIVAL_TIME: &str = "store_arrival_time";
pub const SOURCE_TO_PIPELINE_MS: &str = "source_to_pipeline_ms";
pub const PIPELINE_TO_STORE_MS: &str = "pipeline_to_store_ms";
pub const TOTAL_MS: &str = "total_ms";

/// Columns every model table carries for latency tracking
pub const LATENCY_COLUMNS: [&str; 4] = [
    STORE_ARRIVAL_TIME,
    SOURCE_TO_PIPELINE_MS,
    PIPELINE_TO_STORE_MS,
    TOTAL_MS,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyMetrics {
    pub source_to_pipeline_ms: Option<f64>,
    pub pipeline_to_store_ms: Option<f64>,
    pub total_ms: Option<f64>,
}

impl LatencyMetrics {
    pub fn derive(
        source_event_time: Option<f64>,
        processing_timestamp: Option<f64>,
        store_arrival_time: Option<f64>,
    ) -> Self {
        Self {
            source_to_pipeline_ms: span_ms(source_event_time, processing_timestamp),
            pipeline_to_store_ms: span_ms(processing_timestamp, store_arrival_time),
            total_ms: span_ms(source_event_time, store_arrival_time),
        }
    }

    /// Derive from a stored row, reading the source time from `source_column`
    pub fn from_row(row: &Map<String, JsonValue>, source_column: &str) -> Self {
        let get = |name: &str| row.get(name).and_then(JsonValue::as_f64);
        Self::derive(
            get(source_column),
            get(PROCESSING_TIMESTAMP),
            get(STORE_ARRIVAL_TIME),
        )
    }

    /// Write the derived columns into a row
    pub fn write_to(&self, row: &mut Map<String, JsonValue>) {
        for (column, value) in [
            (SOURCE_TO_PIPELINE_MS, self.source_to_pipeline_ms),
            (PIPELINE_TO_STORE_MS, self.pipeline_to_store_ms),
            (TOTAL_MS, self.total_ms),
        ] {
            row.insert(column.to_string(), to_json(value));
        }
    }

    pub fn hops(&self) -> [(&'static str, Option<f64>); 3] {
        [
            ("source_to_pipeline", self.source_to_pipeline_ms),
            ("pipeline_to_store", self.pipeline_to_store_ms),
            ("total", self.total_ms),
        ]
    }
}

/// Stamp `store_arrival_time` (unless the row already has one) and
/// derive the latency columns, as the store trigger does.
pub fn instrument_row(
    row: &mut Map<String, JsonValue>,
    source_column: &str,
    arrival: f64,
) -> LatencyMetrics {
    let has_arrival = row
        .get(STORE_ARRIVAL_TIME)
        .and_then(JsonValue::as_f64)
        .is_some();
    if !has_arrival {
        row.insert(STORE_ARRIVAL_TIME.to_string(), to_json(Some(arrival)));
    }
    let metrics = LatencyMetrics::from_row(row, source_column);
    metrics.write_to(row);
    metrics
}

fn span_ms(from: Option<f64>, to: Option<f64>) -> Option<f64> {
    Some(round_to_microseconds((to? - from?) * 1000.0))
}

/// Milliseconds rounded to three decimals
fn round_to_microseconds(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

fn to_json(value: Option<f64>) -> JsonValue {
    value.map(JsonValue::from).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_scenario() {
        let m = LatencyMetrics::derive(Some(1000.0), Some(1000.05), Some(1000.08));
        assert_eq!(m.source_to_pipeline_ms, Some(50.0));
        assert_eq!(m.pipeline_to_store_ms, Some(30.0));
        assert_eq!(m.total_ms, Some(80.0));
    }

    #[test]
    fn test_missing_input_yields_null() {
        let m = LatencyMetrics::derive(Some(1000.0), None, Some(1000.08));
        assert_eq!(m.source_to_pipeline_ms, None);
        assert_eq!(m.pipeline_to_store_ms, None);
        assert_eq!(m.total_ms, Some(80.0));

        assert_eq!(LatencyMetrics::derive(None, None, None), LatencyMetrics::default());
    }

    #[test]
    fn test_instrument_row() {
        let mut row = json!({
            "instrument_name": "BTC-PERPETUAL",
            "mark_timestamp": 1000.0,
            "processing_timestamp": 1000.05,
        })
        .as_object()
        .cloned()
        .unwrap();

        let m = instrument_row(&mut row, "mark_timestamp", 1000.08);
        assert_eq!(m.total_ms, Some(80.0));
        assert_eq!(row[STORE_ARRIVAL_TIME], 1000.08);
        assert_eq!(row[SOURCE_TO_PIPELINE_MS], 50.0);
        assert_eq!(row[PIPELINE_TO_STORE_MS], 30.0);
        assert_eq!(row[TOTAL_MS], 80.0);
    }

    #[test]
    fn test_instrument_row_keeps_existing_arrival() {
        let mut row = json!({"time": 10.0, "processing_timestamp": null, "store_arrival_time": 10.5})
            .as_object()
            .cloned()
            .unwrap();
        instrument_row(&mut row, "time", 99.0);
        assert_eq!(row[STORE_ARRIVAL_TIME], 10.5);
        assert!(row[SOURCE_TO_PIPELINE_MS].is_null());
        assert!(row[PIPELINE_TO_STORE_MS].is_null());
        assert_eq!(row[TOTAL_MS], 500.0);
    }
}
