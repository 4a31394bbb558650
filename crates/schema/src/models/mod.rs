//! Built-in exchange models
//!
//! Field lists mirror the exchange's WebSocket payloads. Every model has a
//! v1 schema and a v2 that adds the nullable `processing_timestamp`.

mod ack;
mod index;
mod order;
mod ticker;
mod trade;

pub use ack::Ack;
pub use index::PriceIndex;
pub use order::Order;
pub use ticker::Ticker;
pub use trade::Trade;

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::{ModelSchema, SchemaSet};

/// Instruments the generators pick from
const INSTRUMENTS: [&str; 3] = ["BTC-PERPETUAL", "ETH-PERPETUAL", "SOL-PERPETUAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Cancelled,
    CancelledPartiallyFilled,
    Filled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    GoodTillCancelled,
    ImmediateOrCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MakerTaker {
    Maker,
    Taker,
}

impl Direction {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.random_bool(0.5) {
            Self::Buy
        } else {
            Self::Sell
        }
    }
}

impl OrderStatus {
    const ALL: [OrderStatus; 5] = [
        Self::Open,
        Self::PartiallyFilled,
        Self::Cancelled,
        Self::CancelledPartiallyFilled,
        Self::Filled,
    ];

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }
}

fn random_instrument<R: Rng + ?Sized>(rng: &mut R) -> String {
    INSTRUMENTS
        .choose(rng)
        .copied()
        .unwrap_or(INSTRUMENTS[0])
        .to_string()
}

/// Wall clock in epoch seconds for generated event times
fn now_epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Parse the embedded schema documents of one model, v1 first.
/// The documents are compiled in, so a failure here is a build defect.
fn load_schemas(model: &'static str, documents: &[&'static str]) -> SchemaSet {
    let versions = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| ModelSchema::parse(model, i as u32 + 1, doc))
        .collect::<Result<Vec<_>, _>>()
        .and_then(SchemaSet::new);
    match versions {
        Ok(set) => set,
        Err(e) => panic!("embedded {} schemas are invalid: {}", model, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use crate::model::Model;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_roundtrip<M: Model + PartialEq + std::fmt::Debug>(seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let schemas = M::schemas();
        let current = schemas.current();
        for i in 0..20 {
            let mut record = M::generate(&mut rng);
            // Odd rounds keep the optional timestamp null
            if i % 2 == 0 {
                record.set_processing_timestamp(1_700_000_000.25);
            } else {
                assert_eq!(record.processing_timestamp(), None);
            }
            let bytes = encode(&record, current).unwrap();
            let back: M = decode(&bytes, current, current).unwrap();
            assert_eq!(back, record);
        }
    }

    fn assert_old_reader_compat<M: Model + std::fmt::Debug>() {
        let mut rng = StdRng::seed_from_u64(7);
        let schemas = M::schemas();
        let v1 = schemas.version(1).unwrap();
        let v2 = schemas.version(2).unwrap();

        // v1 writer, v2 reader: new field defaults to null
        let record = M::generate(&mut rng);
        let bytes = encode(&record, v1).unwrap();
        let upgraded: M = decode(&bytes, v1, v2).unwrap();
        assert_eq!(upgraded.processing_timestamp(), None);
        assert_eq!(upgraded.key(), record.key());

        // v2 writer, v1 reader: new field is skipped
        let mut stamped = M::generate(&mut rng);
        stamped.set_processing_timestamp(42.0);
        let bytes = encode(&stamped, v2).unwrap();
        let downgraded: M = decode(&bytes, v2, v1).unwrap();
        assert_eq!(downgraded.processing_timestamp(), None);
        assert_eq!(downgraded.key(), stamped.key());
        assert_eq!(downgraded.source_event_time(), stamped.source_event_time());
    }

    #[test]
    fn test_all_models_roundtrip() {
        assert_roundtrip::<Ticker>(1);
        assert_roundtrip::<Ack>(2);
        assert_roundtrip::<Trade>(3);
        assert_roundtrip::<PriceIndex>(4);
        assert_roundtrip::<Order>(5);
    }

    #[test]
    fn test_all_models_cross_version() {
        assert_old_reader_compat::<Ticker>();
        assert_old_reader_compat::<Ack>();
        assert_old_reader_compat::<Trade>();
        assert_old_reader_compat::<PriceIndex>();
        assert_old_reader_compat::<Order>();
    }

    #[test]
    fn test_all_schema_chains_are_valid_evolutions() {
        // SchemaSet::new validates the chain; touching each set forces it.
        assert_eq!(Ticker::schemas().current().version(), 2);
        assert_eq!(Ack::schemas().current().version(), 2);
        assert_eq!(Trade::schemas().current().version(), 2);
        assert_eq!(PriceIndex::schemas().current().version(), 2);
        assert_eq!(Order::schemas().current().version(), 2);
        for set in [
            Ticker::schemas(),
            Ack::schemas(),
            Trade::schemas(),
            PriceIndex::schemas(),
            Order::schemas(),
        ] {
            assert!(set.current().has_field("processing_timestamp"));
            assert!(!set.version(1).unwrap().has_field("processing_timestamp"));
        }
    }

    #[test]
    fn test_encode_against_wrong_schema_is_serialization_error() {
        let mut rng = StdRng::seed_from_u64(11);
        let ticker = Ticker::generate(&mut rng);
        let err = encode(&ticker, Ack::schemas().current()).unwrap_err();
        assert!(matches!(err, crate::error::SchemaError::Serialization { .. }));
    }

    #[test]
    fn test_status_random_covers_variants() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(format!("{:?}", OrderStatus::random(&mut rng)));
        }
        assert_eq!(seen.len(), OrderStatus::ALL.len());
    }
}
