use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{load_schemas, now_epoch_seconds};
use crate::model::{Model, SchemaSet};

static SCHEMAS: Lazy<SchemaSet> = Lazy::new(|| {
    load_schemas(
        "index",
        &[
            include_str!("../../schemas/index/v1.avsc"),
            include_str!("../../schemas/index/v2.avsc"),
        ],
    )
});

const INDEX_NAMES: [&str; 2] = ["BTCUSD", "ETHUSD"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceIndex {
    pub index_name: String,
    pub price: f64,
    pub timestamp: f64,
    #[serde(default)]
    pub processing_timestamp: Option<f64>,
}

impl Model for PriceIndex {
    const NAME: &'static str = "index";

    fn schemas() -> &'static SchemaSet {
        &SCHEMAS
    }

    fn key(&self) -> &str {
        &self.index_name
    }

    fn source_event_time(&self) -> Option<f64> {
        Some(self.timestamp)
    }

    fn processing_timestamp(&self) -> Option<f64> {
        self.processing_timestamp
    }

    fn set_processing_timestamp(&mut self, ts: f64) {
        self.processing_timestamp = Some(ts);
    }

    fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            index_name: INDEX_NAMES[rng.random_range(0..INDEX_NAMES.len())].to_string(),
            price: rng.random_range(95_000.0..97_000.0),
            timestamp: now_epoch_seconds(),
            processing_timestamp: None,
        }
    }
}
