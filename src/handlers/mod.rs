//! Handler interface & base (C3).
//!
//! The polymorphic contract every projection handler satisfies, modeled as
//! an object-safe `async_trait` (spec.md §9: "interface abstraction with a
//! closed registry... registry stores handlers behind the interface").

mod activity;
mod user;

pub use activity::{ActivityCreatedHandler, ActivityUpdatedHandler, ParticipantJoinedHandler};
pub use user::{UserCreatedHandler, UserStatisticsHandler, UserUpdatedHandler};

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::Bson;

use crate::error::HandlerError;
use crate::model::OutboxEvent;

pub(crate) fn bson_datetime(dt: chrono::DateTime<Utc>) -> Bson {
    Bson::DateTime(mongodb::bson::DateTime::from_chrono(dt))
}

/// Carry a free-form payload value (e.g. GeoJSON `coordinates`) into bson
/// as-is, rather than forcing it through a typed accessor. Missing or
/// unrepresentable values become `Bson::Null` instead of failing the
/// handler — these are optional, pass-through fields.
pub(crate) fn json_to_bson(value: Option<&serde_json::Value>) -> Bson {
    value
        .and_then(|v| mongodb::bson::to_bson(v).ok())
        .unwrap_or(Bson::Null)
}

/// One `(event_type → projection mutation)` rule. Stateless: all state
/// lives in the projection store (spec.md §4.3).
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    /// The dispatch key this handler listens to.
    fn event_type(&self) -> &str;

    /// Stable identifier for logs and metrics.
    fn handler_name(&self) -> &str;

    /// Optional pre-check. Returning `false` causes the dispatcher to skip
    /// this handler without treating it as an error.
    async fn validate(&self, _event: &OutboxEvent) -> bool {
        true
    }

    /// Perform the projection write. Must be safe to re-invoke under
    /// at-least-once delivery.
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError>;
}

/// Structured logging helper shared by every handler, mirroring
/// `BaseEventHandler.log_event` from the Python source this spec was
/// distilled from.
pub(crate) fn log_event(handler_name: &str, event: &OutboxEvent, message: &str) {
    tracing::info!(
        event = message,
        handler = handler_name,
        event_type = %event.event_type,
        event_id = %event.event_id,
        aggregate_id = %event.aggregate_id,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_bson_carries_geojson_through() {
        let coordinates = serde_json::json!({
            "type": "Point",
            "coordinates": [4.895168, 52.370216],
        });
        let bson = json_to_bson(Some(&coordinates));
        let doc = bson.as_document().unwrap();
        assert_eq!(doc.get_str("type").unwrap(), "Point");
        assert_eq!(doc.get_array("coordinates").unwrap().len(), 2);
    }

    #[test]
    fn json_to_bson_is_null_when_absent() {
        assert_eq!(json_to_bson(None), Bson::Null);
    }
}
