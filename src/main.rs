use std::sync::Arc;

use actix::prelude::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod consumer;
mod error;
mod handlers;
mod lifecycle;
mod metrics;
mod model;
mod registry;
mod store;
mod utils;

use config::Config;
use consumer::Consumer;
use lifecycle::CoordinatorActor;
use registry::HandlerRegistry;
use store::ProjectionStore;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{},event_processor=debug", config.log_level))),
        )
        .init();

    tracing::info!(event = "startup", "starting event processor");

    // 1. Build the registry with every domain handler. Registration order
    // is dispatch order for handlers sharing an event_type (spec.md §4.5).
    let mut registry = HandlerRegistry::new();

    // 2. Connect the projection store. Fatal at startup on failure
    // (spec.md §4.2/§7).
    let store = match ProjectionStore::connect(&config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(event = "startup_failed", error = %e, "failed to connect to projection store");
            std::process::exit(1);
        }
    };

    registry.register(Arc::new(handlers::UserCreatedHandler::new(store.clone())));
    registry.register(Arc::new(handlers::UserStatisticsHandler::new(store.clone())));
    registry.register(Arc::new(handlers::UserUpdatedHandler::new(store.clone())));
    registry.register(Arc::new(handlers::ActivityCreatedHandler::new(store.clone())));
    registry.register(Arc::new(handlers::ActivityUpdatedHandler::new(store.clone())));
    registry.register(Arc::new(handlers::ParticipantJoinedHandler::new(store.clone())));

    // 3. Metrics: construct the registry and serve it over HTTP for the
    // process lifetime (ambient; spec.md's Non-goals exclude features,
    // not observability).
    let metrics = Arc::new(metrics::Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
            tracing::error!(event = "metrics_server_error", error = %e, "metrics server exited");
        }
    });

    // 4. Construct and initialize the consumer (spec.md §4.7 steps 1, 4, 5).
    let consumer = match Consumer::new(&config, registry, metrics.clone()) {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            tracing::error!(event = "startup_failed", error = %e, "failed to construct consumer");
            std::process::exit(1);
        }
    };

    if let Err(e) = consumer.initialize() {
        tracing::error!(event = "startup_failed", error = %e, "failed to initialize consumer");
        std::process::exit(1);
    }

    // 5. Start the coordinator actor (infra-only supervision: health
    // monitoring). The event-dispatch loop below is NOT one of its
    // children — it is a plain cooperative task per spec.md §5.
    let coordinator = CoordinatorActor::new(store.clone(), consumer.clone()).start();

    // 6. Register signal handlers, then dispatch the consumer loop
    // (spec.md §4.7 steps 2, 6).
    let loop_consumer = consumer.clone();
    let mut loop_handle = tokio::spawn(async move { loop_consumer.run().await });

    let exit_code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(event = "shutdown_signal", signal = "SIGINT", "shutdown signal received");
            consumer.request_shutdown();
            // The loop finishes its current record and commits before
            // returning (spec.md §5 P10) — wait for that to settle.
            match (&mut loop_handle).await {
                Ok(Ok(())) => 0,
                Ok(Err(e)) => {
                    tracing::error!(event = "consumer_fatal_error", error = %e, "consumer loop exited with a fatal error");
                    1
                }
                Err(e) => {
                    tracing::error!(event = "consumer_task_panicked", error = %e, "consumer task panicked");
                    1
                }
            }
        }
        _ = sigterm() => {
            tracing::info!(event = "shutdown_signal", signal = "SIGTERM", "shutdown signal received");
            consumer.request_shutdown();
            match (&mut loop_handle).await {
                Ok(Ok(())) => 0,
                Ok(Err(e)) => {
                    tracing::error!(event = "consumer_fatal_error", error = %e, "consumer loop exited with a fatal error");
                    1
                }
                Err(e) => {
                    tracing::error!(event = "consumer_task_panicked", error = %e, "consumer task panicked");
                    1
                }
            }
        }
        result = &mut loop_handle => {
            match result {
                Ok(Ok(())) => 0,
                Ok(Err(e)) => {
                    tracing::error!(event = "consumer_fatal_error", error = %e, "consumer loop exited with a fatal error");
                    1
                }
                Err(e) => {
                    tracing::error!(event = "consumer_task_panicked", error = %e, "consumer task panicked");
                    1
                }
            }
        }
    };

    // 7. Shutdown order: the loop drains its current record and commits
    // before returning (spec.md §4.7 step 2); emit the summary, close the
    // store, stop the coordinator (steps 3-4).
    consumer.shutdown();

    coordinator.send(lifecycle::coordinator::Shutdown).await.ok();

    match Arc::try_unwrap(store) {
        Ok(store) => store.disconnect().await,
        Err(_) => tracing::warn!(
            event = "store_still_shared",
            "projection store still has outstanding references at shutdown"
        ),
    }

    tracing::info!(event = "shutdown_complete", exit_code, "event processor stopped");
    std::process::exit(exit_code);
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    term.recv().await;
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
