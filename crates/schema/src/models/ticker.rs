use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{load_schemas, now_epoch_seconds, random_instrument};
use crate::model::{Model, SchemaSet};

static SCHEMAS: Lazy<SchemaSet> = Lazy::new(|| {
    load_schemas(
        "ticker",
        &[
            include_str!("../../schemas/ticker/v1.avsc"),
            include_str!("../../schemas/ticker/v2.avsc"),
        ],
    )
});

/// Mark, top-of-book and 24h statistics for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub instrument_name: String,
    pub mark_price: f64,
    pub mark_timestamp: f64,
    pub best_bid_price: f64,
    pub best_bid_amount: f64,
    pub best_ask_price: f64,
    pub best_ask_amount: f64,
    pub last_price: f64,
    pub delta: f64,
    pub volume_24h: f64,
    pub value_24h: f64,
    pub low_price_24h: f64,
    pub high_price_24h: f64,
    pub change_24h: f64,
    pub index_price: f64,
    pub forward: f64,
    pub funding_mark: f64,
    pub funding_rate: f64,
    pub collar_low: f64,
    pub collar_high: f64,
    pub realised_funding_24h: f64,
    pub average_funding_rate_24h: f64,
    pub open_interest: f64,
    #[serde(default)]
    pub processing_timestamp: Option<f64>,
}

impl Model for Ticker {
    const NAME: &'static str = "ticker";

    fn schemas() -> &'static SchemaSet {
        &SCHEMAS
    }

    fn key(&self) -> &str {
        &self.instrument_name
    }

    fn source_event_time(&self) -> Option<f64> {
        Some(self.mark_timestamp)
    }

    fn processing_timestamp(&self) -> Option<f64> {
        self.processing_timestamp
    }

    fn set_processing_timestamp(&mut self, ts: f64) {
        self.processing_timestamp = Some(ts);
    }

    fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let base = rng.random_range(95_000.0..97_000.0);
        Self {
            instrument_name: random_instrument(rng),
            mark_price: base,
            mark_timestamp: now_epoch_seconds(),
            best_bid_price: base - rng.random_range(10.0..30.0),
            best_bid_amount: rng.random_range(0.01..0.1),
            best_ask_price: base + rng.random_range(10.0..30.0),
            best_ask_amount: rng.random_range(0.01..0.1),
            last_price: base + rng.random_range(-50.0..50.0),
            delta: 1.0,
            volume_24h: rng.random_range(700.0..800.0),
            value_24h: rng.random_range(68_000_000.0..69_000_000.0),
            low_price_24h: rng.random_range(93_000.0..94_000.0),
            high_price_24h: rng.random_range(97_000.0..98_000.0),
            change_24h: rng.random_range(2_000.0..3_500.0),
            index_price: base - rng.random_range(-10.0..10.0),
            forward: base - rng.random_range(-10.0..10.0),
            funding_mark: rng.random_range(0.0..0.001),
            funding_rate: rng.random_range(0.0..0.001),
            collar_low: base * 0.99,
            collar_high: base * 1.01,
            realised_funding_24h: rng.random_range(0.0..0.001),
            average_funding_rate_24h: rng.random_range(0.0..0.001),
            open_interest: rng.random_range(3_700.0..3_800.0),
            processing_timestamp: None,
        }
    }
}
