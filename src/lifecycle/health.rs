//! Health monitor actor (C7, infra-only supervision).
//!
//! Adapted from the teacher's `actors::health_check::HealthCheckActor`:
//! same actix `Actor`/`Handler` shape, same periodic-tick pattern, but
//! polling the projection store's reachability and the consumer's state
//! machine instead of a Redpanda producer's circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;

use actix::prelude::*;
use chrono::{DateTime, Utc};

use crate::consumer::{Consumer, ConsumerState};
use crate::store::ProjectionStore;

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Message)]
#[rtype(result = "SystemHealth")]
pub struct GetSystemHealth;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    store: Arc<ProjectionStore>,
    consumer: Arc<Consumer>,
}

impl HealthMonitorActor {
    pub fn new(store: Arc<ProjectionStore>, consumer: Arc<Consumer>) -> Self {
        Self {
            components: HashMap::new(),
            store,
            consumer,
        }
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{name}: {msg}"));
                }
                HealthStatus::Degraded(_) => has_degraded = true,
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(event = "health_monitor_started", "health monitor actor started");

        let addr = ctx.address();

        ctx.run_interval(std::time::Duration::from_secs(15), move |act, _ctx| {
            let store = act.store.clone();
            let consumer = act.consumer.clone();
            let addr = addr.clone();

            actix::spawn(async move {
                let store_status = match store.health_check().await {
                    Ok(()) => HealthStatus::Healthy,
                    Err(e) => HealthStatus::Unhealthy(e.to_string()),
                };
                addr.do_send(UpdateHealth {
                    component: "projection_store".to_string(),
                    status: store_status,
                    details: None,
                });

                let consumer_status = match consumer.state() {
                    ConsumerState::Running => HealthStatus::Healthy,
                    ConsumerState::Failed => {
                        HealthStatus::Unhealthy("consumer loop exited on a fatal error".to_string())
                    }
                    ConsumerState::New | ConsumerState::Ready => {
                        HealthStatus::Degraded("consumer loop not yet running".to_string())
                    }
                    ConsumerState::Draining | ConsumerState::Stopped => {
                        HealthStatus::Degraded("consumer loop stopped".to_string())
                    }
                };
                addr.do_send(UpdateHealth {
                    component: "consumer".to_string(),
                    status: consumer_status,
                    details: Some(format!(
                        "state={:?} processed={} errors={}",
                        consumer.state(),
                        consumer.processed_count(),
                        consumer.error_count()
                    )),
                });
            });
        });
    }
}

impl Handler<UpdateHealth> for HealthMonitorActor {
    type Result = ();

    fn handle(&mut self, msg: UpdateHealth, _: &mut Self::Context) {
        let health = ComponentHealth {
            name: msg.component.clone(),
            status: msg.status.clone(),
            last_check: Utc::now(),
            details: msg.details,
        };

        tracing::debug!(component = %msg.component, status = ?msg.status, "updated component health");
        self.components.insert(msg.component, health);
    }
}

impl Handler<GetSystemHealth> for HealthMonitorActor {
    type Result = MessageResult<GetSystemHealth>;

    fn handle(&mut self, _msg: GetSystemHealth, _: &mut Self::Context) -> Self::Result {
        MessageResult(SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        })
    }
}
