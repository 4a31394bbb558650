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
        "ack",
        &[
            include_str!("../../schemas/ack/v1.avsc"),
            include_str!("../../schemas/ack/v2.avsc"),
        ],
    )
});

/// Exchange acknowledgement of an order state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<i64>,
    pub instrument_name: String,
    pub direction: Direction,
    #[serde(default)]
    pub price: Option<f64>,
    pub amount: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub change_reason: String,
    #[serde(default)]
    pub delete_reason: Option<String>,
    #[serde(default)]
    pub insert_reason: Option<String>,
    pub create_time: f64,
    pub persistent: bool,
    #[serde(default)]
    pub processing_timestamp: Option<f64>,
}

impl Model for Ack {
    const NAME: &'static str = "ack";

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
        let amount = rng.random_range(0.1..1.0);
        let status = OrderStatus::random(rng);

        let (filled_amount, remaining_amount) = match status {
            OrderStatus::Open => (0.0, amount),
            OrderStatus::PartiallyFilled => {
                let filled = amount * rng.random_range(0.1..0.9);
                (filled, amount - filled)
            }
            OrderStatus::Filled => (amount, 0.0),
            OrderStatus::Cancelled => (0.0, 0.0),
            OrderStatus::CancelledPartiallyFilled => (amount * rng.random_range(0.1..0.9), 0.0),
        };

        let (change_reason, delete_reason, insert_reason) = match status {
            OrderStatus::Open => ("insert", None, Some("client_request".to_string())),
            OrderStatus::PartiallyFilled | OrderStatus::Filled => ("fill", None, None),
            OrderStatus::Cancelled | OrderStatus::CancelledPartiallyFilled => {
                ("cancel", Some("client_cancel".to_string()), None)
            }
        };

        // Market orders carry no limit price
        let order_type = if rng.random_bool(0.9) {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        let price = match order_type {
            OrderType::Limit => Some(rng.random_range(95_000.0..97_000.0)),
            OrderType::Market => None,
        };

        Self {
            order_id: uuid::Uuid::new_v4().to_string(),
            client_order_id: Some(rng.random_range(100..1000)),
            instrument_name: random_instrument(rng),
            direction: Direction::random(rng),
            price,
            amount,
            filled_amount,
            remaining_amount,
            status,
            order_type,
            time_in_force: TimeInForce::GoodTillCancelled,
            change_reason: change_reason.to_string(),
            delete_reason,
            insert_reason,
            create_time: now_epoch_seconds(),
            persistent: false,
            processing_timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_amounts_are_consistent() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let ack = Ack::generate(&mut rng);
            assert!(ack.filled_amount >= 0.0);
            assert!(ack.filled_amount + ack.remaining_amount <= ack.amount + 1e-9);
            match ack.status {
                OrderStatus::Open => assert_eq!(ack.remaining_amount, ack.amount),
                OrderStatus::Filled => assert_eq!(ack.filled_amount, ack.amount),
                OrderStatus::Cancelled | OrderStatus::CancelledPartiallyFilled => {
                    assert_eq!(ack.remaining_amount, 0.0);
                    assert!(ack.delete_reason.is_some());
                }
                OrderStatus::PartiallyFilled => assert!(ack.remaining_amount > 0.0),
            }
        }
    }
}
