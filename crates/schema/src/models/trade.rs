use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{load_schemas, now_epoch_seconds, random_instrument, MakerTaker};
use crate::model::{Model, SchemaSet};

static SCHEMAS: Lazy<SchemaSet> = Lazy::new(|| {
    load_schemas(
        "trade",
        &[
            include_str!("../../schemas/trade/v1.avsc"),
            include_str!("../../schemas/trade/v2.avsc"),
        ],
    )
});

/// Execution of one of our orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<i64>,
    pub instrument_name: String,
    pub price: f64,
    pub amount: f64,
    pub maker_taker: MakerTaker,
    pub time: f64,
    #[serde(default)]
    pub processing_timestamp: Option<f64>,
}

impl Model for Trade {
    const NAME: &'static str = "trade";

    fn schemas() -> &'static SchemaSet {
        &SCHEMAS
    }

    fn key(&self) -> &str {
        &self.order_id
    }

    fn source_event_time(&self) -> Option<f64> {
        Some(self.time)
    }

    fn processing_timestamp(&self) -> Option<f64> {
        self.processing_timestamp
    }

    fn set_processing_timestamp(&mut self, ts: f64) {
        self.processing_timestamp = Some(ts);
    }

    fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let trade_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            trade_id: format!("TRADE-{}", &trade_id[..8]),
            order_id: format!(
                "{:02X}{:06X}00000000",
                rng.random_range(0..=0xFFu32),
                rng.random_range(0..=0xFF_FFFFu32)
            ),
            client_order_id: if rng.random_bool(0.7) {
                Some(rng.random_range(100..1000))
            } else {
                None
            },
            instrument_name: random_instrument(rng),
            price: rng.random_range(95_000.0..97_000.0),
            amount: rng.random_range(0.1..1.0),
            maker_taker: if rng.random_bool(0.5) {
                MakerTaker::Maker
            } else {
                MakerTaker::Taker
            },
            time: now_epoch_seconds(),
            processing_timestamp: None,
        }
    }
}
