//! cryptics-middleware: Bus transport abstractions
//!
//! Provides the `Transport` trait with in-memory and NATS JetStream
//! implementations, topic naming, key partitioning and clocks.

pub mod clock;
pub mod error;
pub mod factory;
pub mod latency;
pub mod memory;
pub mod nats;
pub mod partition;
pub mod topics;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TransportError;
pub use factory::{FactoryError, MiddlewareFactory};
pub use memory::InMemoryTransport;
pub use nats::NatsTransport;
pub use partition::partition_for_key;
pub use topics::TopicBuilder;
pub use transport::{headers, Subscription, Transport, TransportMessage};
