use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    load_schemas, now_epoch_seconds, random_instrument, Direction, OrderStatus, OrderType,
    TimeInForce,
};
use crate::model::{Model, SchemaSet};

static SCHEMAS: Lazy<SchemaSet> = Lazy::new(|| {
    load_schemas(
        "order",
        &[
            include_str!("../../schemas/order/v1.avsc"),
            include_str!("../../schemas/order/v2.avsc"),
        ],
    )
});

fn empty_fills() -> String {
    "[]".to_string()
}

/// Snapshot of a working order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub instrument_name: String,
    pub direction: Direction,
    pub price: f64,
    pub amount: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub client_order_id: i64,
    pub status: OrderStatus,
    /// Fills as a JSON array string
    #[serde(default = "empty_fills")]
    pub fills: String,
    pub change_reason: String,
    pub insert_reason: String,
    pub create_time: f64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub persistent: bool,
    #[serde(default)]
    pub processing_timestamp: Option<f64>,
}

impl Model for Order {
    const NAME: &'static str = "order";

    fn schemas() -> &'static SchemaSet {
        &SCHEMAS
    }

    fn key(&self) -> &str {
        &self.order_id
    }

    fn source_event_time(&self) -> Option<f64> {
        Some(self.create_time)
    }

    fn processing_timestamp(&self) -> Option<f64> {
        self.processing_timestamp
    }

    fn set_processing_timestamp(&mut self, ts: f64) {
        self.processing_timestamp = Some(ts);
    }

    fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let client_id: i64 = rng.random_range(100..1000);
        let direction = Direction::random(rng);
        let base = rng.random_range(95_000.0..97_000.0);
        let amount = rng.random_range(0.1..0.5);
        Self {
            order_id: format!("001F377D{:08X}", client_id),
            instrument_name: random_instrument(rng),
            direction,
            price: match direction {
                Direction::Buy => base - 100.0,
                Direction::Sell => base + 100.0,
            },
            amount,
            filled_amount: 0.0,
            remaining_amount: amount,
            client_order_id: client_id,
            status: OrderStatus::Open,
            fills: empty_fills(),
            change_reason: if client_id % 2 == 0 { "insert" } else { "amend" }.to_string(),
            insert_reason: "client_request".to_string(),
            create_time: now_epoch_seconds(),
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GoodTillCancelled,
            persistent: false,
            processing_timestamp: None,
        }
    }
}
