use thiserror::Error;

/// Failure to parse the raw bytes delivered by the log into an [`crate::model::Envelope`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("envelope missing required field '{0}'")]
    MissingField(&'static str),
}

/// Failure to lift a decoded [`crate::model::Envelope`] into an [`crate::model::OutboxEvent`].
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("event cannot be constructed from op '{0}' (expected c or u)")]
    UnsupportedOp(char),

    #[error("payload missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a valid UUID: {source}")]
    InvalidUuid {
        field: &'static str,
        #[source]
        source: uuid::Error,
    },

    #[error("field '{field}' is not a valid timestamp: {source}")]
    InvalidTimestamp {
        field: &'static str,
        #[source]
        source: chrono::ParseError,
    },

    #[error("field '{0}' has an unexpected type")]
    WrongType(&'static str),

    #[error("unknown status value '{0}'")]
    UnknownStatus(String),
}

/// Failure raised by a [`crate::handlers::ProjectionHandler`] while writing a projection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("payload validation failed: {0}")]
    Validation(String),

    #[error("projection store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure establishing or using the projection store gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to projection store: {0}")]
    Connect(#[source] mongodb::error::Error),

    #[error("projection store health check failed: {0}")]
    HealthCheck(#[source] mongodb::error::Error),

    #[error("projection store operation failed: {0}")]
    Operation(#[source] mongodb::error::Error),

    #[error("circuit breaker open for projection store")]
    CircuitOpen,
}

/// Fatal failure of the consumer loop itself (not a single-record failure).
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("projection store unavailable: {0}")]
    Store(#[from] StoreError),
}
