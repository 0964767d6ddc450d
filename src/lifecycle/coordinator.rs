//! Coordinator actor (C7, infra-only supervision).
//!
//! Adapted from the teacher's `actors::infrastructure::coordinator::CoordinatorActor`:
//! same supervisor shape (start a child actor, schedule a periodic
//! health poll, handle a `Shutdown` message), narrowed to the one child
//! this rewrite still needs — the health monitor. The event-dispatch
//! loop (`Consumer::run`) is deliberately NOT one of this actor's
//! children: per spec.md §5 it is a plain cooperative `tokio` task, not
//! something that should receive work through an actor mailbox.

use std::sync::Arc;

use actix::prelude::*;

use super::health::{GetSystemHealth, HealthMonitorActor, HealthStatus};
use crate::consumer::Consumer;
use crate::store::ProjectionStore;

pub struct CoordinatorActor {
    store: Arc<ProjectionStore>,
    consumer: Arc<Consumer>,
    health_monitor: Option<Addr<HealthMonitorActor>>,
}

impl CoordinatorActor {
    pub fn new(store: Arc<ProjectionStore>, consumer: Arc<Consumer>) -> Self {
        Self {
            store,
            consumer,
            health_monitor: None,
        }
    }
}

impl Actor for CoordinatorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(event = "coordinator_started", "coordinator actor started");

        let health_monitor = HealthMonitorActor::new(self.store.clone(), self.consumer.clone()).start();
        self.health_monitor = Some(health_monitor.clone());

        ctx.run_interval(std::time::Duration::from_secs(30), move |_act, _ctx| {
            let health_monitor = health_monitor.clone();
            actix::spawn(async move {
                match health_monitor.send(GetSystemHealth).await {
                    Ok(health) => match health.overall_status {
                        HealthStatus::Healthy => tracing::debug!(event = "system_health_check", status = "healthy"),
                        HealthStatus::Degraded(ref msg) => {
                            tracing::warn!(event = "system_health_check", status = "degraded", detail = %msg)
                        }
                        HealthStatus::Unhealthy(ref msg) => {
                            tracing::error!(event = "system_health_check", status = "unhealthy", detail = %msg)
                        }
                    },
                    Err(e) => tracing::error!(event = "system_health_check_failed", error = %e),
                }
            });
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!(event = "coordinator_stopping", "coordinator actor stopping");
        Running::Stop
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for CoordinatorActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        tracing::info!(event = "coordinator_shutdown_received", "coordinator received shutdown signal");

        if let Some(ref health_monitor) = self.health_monitor {
            health_monitor.do_send(StopActor);
        }

        ctx.stop();
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct StopActor;

impl Handler<StopActor> for HealthMonitorActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!(event = "health_monitor_stopping", "health monitor actor stopping");
        ctx.stop();
    }
}
