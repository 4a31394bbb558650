//! In-memory transport for tests and single-process runs
pub mod transport;

pub use transport::InMemoryTransport;
