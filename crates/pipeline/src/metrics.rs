//! Prometheus metrics for producers, connectors and the sink

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

use crate::connector::ConnectorState;
use crate::latency::LatencyMetrics;

const LABEL_MODEL: &str = "model";
const LABEL_REASON: &str = "reason";
const LABEL_CONNECTOR: &str = "connector";
const LABEL_TABLE: &str = "table";
const LABEL_HOP: &str = "hop";

static MESSAGES_PRODUCED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_messages_produced_total",
        "Envelopes accepted by the bus",
        &[LABEL_MODEL]
    )
    .expect("Failed to register messages_produced metric")
});

/// Messages dropped by the producer, by reason (serialization, publish)
static MESSAGES_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_messages_failed_total",
        "Messages the producer could not place on the bus",
        &[LABEL_MODEL, LABEL_REASON]
    )
    .expect("Failed to register messages_failed metric")
});

static PUBLISH_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_publish_retries_total",
        "Publish attempts retried after a transport error",
        &[LABEL_MODEL]
    )
    .expect("Failed to register publish_retries metric")
});

static DEAD_LETTERS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_dead_letters_total",
        "Messages routed to the dead-letter topic",
        &[LABEL_MODEL]
    )
    .expect("Failed to register dead_letters metric")
});

static PUBLISH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cryptics_publish_duration_seconds",
        "Time from encode to bus acknowledgement, retries included",
        &[LABEL_MODEL],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("Failed to register publish_duration metric")
});

/// Connector state as a number: see `ConnectorState::code`
static CONNECTOR_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "cryptics_connector_state",
        "Connector state (0=unsubmitted 1=pending 2=running 3=degraded 4=failed)",
        &[LABEL_CONNECTOR]
    )
    .expect("Failed to register connector_state metric")
});

static ROWS_STORED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_rows_stored_total",
        "Rows written by the local sink worker",
        &[LABEL_TABLE]
    )
    .expect("Failed to register rows_stored metric")
});

static SINK_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_sink_errors_total",
        "Records the local sink worker skipped",
        &[LABEL_TABLE]
    )
    .expect("Failed to register sink_errors metric")
});

/// Records the bus dropped before the sink read them
static RECORDS_LOST: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cryptics_sink_records_lost_total",
        "Records lost to a lagging sink subscription",
        &[LABEL_TABLE]
    )
    .expect("Failed to register records_lost metric")
});

static LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cryptics_latency_ms",
        "Per-hop pipeline latency in milliseconds",
        &[LABEL_MODEL, LABEL_HOP],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .expect("Failed to register latency metric")
});

/// Handle for recording one model's producer metrics
#[derive(Clone)]
pub struct ProducerMetrics {
    model: String,
}

impl ProducerMetrics {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn inc_produced(&self) {
        MESSAGES_PRODUCED.with_label_values(&[&self.model]).inc();
    }

    pub fn inc_failed(&self, reason: &str) {
        MESSAGES_FAILED
            .with_label_values(&[&self.model, reason])
            .inc();
    }

    pub fn inc_retry(&self) {
        PUBLISH_RETRIES.with_label_values(&[&self.model]).inc();
    }

    pub fn inc_dead_letter(&self) {
        DEAD_LETTERS.with_label_values(&[&self.model]).inc();
    }

    pub fn observe_publish_duration(&self, secs: f64) {
        PUBLISH_DURATION
            .with_label_values(&[&self.model])
            .observe(secs);
    }
}

pub fn set_connector_state(connector: &str, state: ConnectorState) {
    CONNECTOR_STATE
        .with_label_values(&[connector])
        .set(state.code());
}

/// Handle for recording sink metrics for one table
#[derive(Clone)]
pub struct SinkMetrics {
    model: String,
    table: String,
}

impl SinkMetrics {
    pub fn new(model: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            table: table.into(),
        }
    }

    pub fn inc_rows(&self) {
        ROWS_STORED.with_label_values(&[&self.table]).inc();
    }

    pub fn inc_errors(&self) {
        SINK_ERRORS.with_label_values(&[&self.table]).inc();
    }

    pub fn add_lost(&self, count: u64) {
        RECORDS_LOST.with_label_values(&[&self.table]).inc_by(count);
    }

    pub fn observe_latency(&self, latency: &LatencyMetrics) {
        for (hop, value) in latency.hops() {
            if let Some(ms) = value {
                LATENCY_MS
                    .with_label_values(&[&self.model, hop])
                    .observe(ms);
            }
        }
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
