use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("stream setup failed: {0}")]
    StreamFailed(String),
    #[error("subscription closed")]
    Closed,
    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),
}
