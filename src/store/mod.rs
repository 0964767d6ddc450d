//! Projection store gateway (C2).
//!
//! Owns exactly one pooled client to the document store and hands out
//! per-collection handles. Modeled on the teacher's
//! `event_sourcing::store::EventStore`: one struct, constructed once in
//! `main`, wrapped in an `Arc` and shared — no process-wide singleton
//! (spec.md §9 explicitly redesigns the source's module-level global away).

use std::time::Duration;

use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};

use crate::config::Config;
use crate::error::StoreError;
use crate::utils::{retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryConfig, RetryResult};

/// Gateway to the projection store. One instance lives for the process
/// lifetime, constructed in startup and closed in teardown (spec.md §4.2).
pub struct ProjectionStore {
    client: Client,
    database: Database,
    circuit_breaker: CircuitBreaker,
}

impl ProjectionStore {
    /// Establish the client with bounded connect/server-selection timeouts
    /// and probe reachability with an admin `ping`. A handful of retries
    /// with backoff absorb a store that's mid-restart; persistent failure
    /// is fatal at startup per spec.md §4.2/§7.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.mongodb_uri)
            .await
            .map_err(StoreError::Connect)?;
        options.connect_timeout = Some(config.mongodb_connect_timeout());
        options.server_selection_timeout = Some(config.mongodb_server_selection_timeout());

        let retry_config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };

        let client = match retry_with_backoff(retry_config, |attempt| {
            let options = options.clone();
            async move {
                tracing::info!(attempt, "connecting to projection store");
                Client::with_options(options)
            }
        })
        .await
        {
            RetryResult::Success(client) => client,
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => {
                return Err(StoreError::Connect(e));
            }
        };

        let database = client.database(&config.mongodb_database);

        database
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map_err(StoreError::HealthCheck)?;

        tracing::info!(
            uri = %config.redacted_mongodb_uri(),
            database = %config.mongodb_database,
            "projection store connected"
        );

        let circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        });

        Ok(Self {
            client,
            database,
            circuit_breaker,
        })
    }

    /// Idempotent; safe to call even after a failed `connect`. Consumes the
    /// gateway — there is nothing left to hand out a collection handle to
    /// once the underlying client has shut down.
    pub async fn disconnect(self) {
        self.client.shutdown().await;
        tracing::info!("projection store disconnected");
    }

    /// Re-probe reachability without tearing anything down.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.database
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(StoreError::HealthCheck)
    }

    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    /// Execute a projection write behind the gateway's circuit breaker,
    /// protecting the dispatcher from a degrading store without adding
    /// per-write retries (spec.md §5: writes rely on the store client's
    /// own timeouts).
    pub async fn guarded<F, T>(&self, operation: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, mongodb::error::Error>>,
    {
        match self.circuit_breaker.call(operation).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen) => Err(StoreError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(StoreError::Operation(e)),
        }
    }
}

/// True iff `error` is a duplicate-key (`E11000`) write error — the signal
/// that an insert raced a prior delivery of the same create event
/// (spec.md §4.4: "idempotent-on-replay").
pub fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;

    match error.kind.as_ref() {
        ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error)) => {
            write_error.code == 11000
        }
        ErrorKind::BulkWrite(bulk) => bulk
            .write_errors
            .values()
            .any(|write_error| write_error.code == 11000),
        _ => false,
    }
}
