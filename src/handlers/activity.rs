use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{doc, Document};

use crate::error::{HandlerError, StoreError};
use crate::model::OutboxEvent;
use crate::store::{is_duplicate_key_error, ProjectionStore};

use super::{bson_datetime, json_to_bson, log_event, ProjectionHandler};

/// `ActivityCreated` (spec.md §4.4): insert, seeding the participant
/// roster empty and `allowed_users` with just the creator.
pub struct ActivityCreatedHandler {
    store: Arc<ProjectionStore>,
}

impl ActivityCreatedHandler {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionHandler for ActivityCreatedHandler {
    fn event_type(&self) -> &str {
        "ActivityCreated"
    }

    fn handler_name(&self) -> &str {
        "ActivityCreatedHandler"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        log_event(self.handler_name(), event, "processing_activity_created");

        let activity_id = event.aggregate_id.to_string();
        let creator_id = event
            .payload_str("creator_user_id")
            .ok_or_else(|| HandlerError::Validation("payload missing creator_user_id".into()))?;

        let doc = doc! {
            "_id": &activity_id,
            "title": event.payload_str("title"),
            "description": event.payload_str("description"),
            "creator_id": creator_id,
            "type": event.payload_str("activity_type"),
            "location": {
                "name": event.payload_str("location_name"),
                "address": event.payload_str("location_address"),
                "coordinates": json_to_bson(event.payload_field("coordinates")),
            },
            "schedule": {
                "start_date": event.payload_str("start_date"),
                "end_date": event.payload_str("end_date"),
                "timezone": event.payload_str("timezone"),
            },
            "participants": {
                "current_count": 0i32,
                "max_count": event.payload_field("max_participants").and_then(|v| v.as_i64()).map(|n| n as i32),
                "list": [],
            },
            "status": "active",
            "metadata": {
                "created_at": bson_datetime(event.created_at),
                "updated_at": bson_datetime(Utc::now()),
                "source_event_id": event.event_id.to_string(),
            },
            "allowed_users": [creator_id],
        };

        let collection = self.store.collection("activities");
        match self.store.guarded(collection.insert_one(doc)).await {
            Ok(_) => {}
            Err(StoreError::Operation(inner)) if is_duplicate_key_error(&inner) => {
                log_event(self.handler_name(), event, "activity_created_duplicate_ignored");
            }
            Err(e) => return Err(HandlerError::Store(e)),
        }

        log_event(self.handler_name(), event, "activity_created_success");
        Ok(())
    }
}

/// `ActivityUpdated` (spec.md §4.4): partial update over simple and
/// dotted-path fields.
pub struct ActivityUpdatedHandler {
    store: Arc<ProjectionStore>,
}

impl ActivityUpdatedHandler {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionHandler for ActivityUpdatedHandler {
    fn event_type(&self) -> &str {
        "ActivityUpdated"
    }

    fn handler_name(&self) -> &str {
        "ActivityUpdatedHandler"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        log_event(self.handler_name(), event, "processing_activity_updated");

        let activity_id = event.aggregate_id.to_string();
        let mut set_doc = Document::new();

        if let Some(title) = event.payload_str("title") {
            set_doc.insert("title", title);
        }
        if let Some(description) = event.payload_str("description") {
            set_doc.insert("description", description);
        }
        if let Some(status) = event.payload_str("status") {
            set_doc.insert("status", status);
        }
        if let Some(location_name) = event.payload_str("location_name") {
            set_doc.insert("location.name", location_name);
        }
        if let Some(location_address) = event.payload_str("location_address") {
            set_doc.insert("location.address", location_address);
        }

        set_doc.insert("metadata.updated_at", bson_datetime(Utc::now()));
        set_doc.insert("metadata.last_event_id", event.event_id.to_string());

        let collection = self.store.collection("activities");
        let result = self
            .store
            .guarded(collection.update_one(doc! { "_id": &activity_id }, doc! { "$set": set_doc }))
            .await
            .map_err(HandlerError::Store)?;

        if result.matched_count == 0 {
            return Err(HandlerError::NotFound(format!(
                "activity {activity_id} not found"
            )));
        }

        log_event(self.handler_name(), event, "activity_updated_success");
        Ok(())
    }
}

/// `ParticipantJoined` (spec.md §4.4). Resolves the source's
/// `$addToSet` + `$inc` double-count hazard (spec.md §9 Open Questions)
/// with a two-step guarded update: the first update only matches when
/// this participant is not yet in `participants.list`, so the counter
/// only increments on the join that actually inserts them. A second,
/// unguarded update keeps `allowed_users`/metadata fresh on replay
/// without touching the list or the counter, and distinguishes "already
/// joined" (matches) from "activity missing" (matches zero → NotFound).
pub struct ParticipantJoinedHandler {
    store: Arc<ProjectionStore>,
}

impl ParticipantJoinedHandler {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionHandler for ParticipantJoinedHandler {
    fn event_type(&self) -> &str {
        "ParticipantJoined"
    }

    fn handler_name(&self) -> &str {
        "ParticipantJoinedHandler"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        log_event(self.handler_name(), event, "processing_participant_joined");

        let activity_id = event.aggregate_id.to_string();
        let user_id = event
            .payload_str("user_id")
            .ok_or_else(|| HandlerError::Validation("payload missing user_id".into()))?
            .to_string();

        let collection = self.store.collection("activities");

        let first_join = self
            .store
            .guarded(collection.update_one(
                doc! {
                    "_id": &activity_id,
                    "participants.list.user_id": { "$ne": &user_id },
                },
                doc! {
                    "$push": {
                        "participants.list": {
                            "user_id": &user_id,
                            "joined_at": bson_datetime(event.created_at),
                            "status": "confirmed",
                        },
                    },
                    "$addToSet": { "allowed_users": &user_id },
                    "$inc": { "participants.current_count": 1i32 },
                    "$set": {
                        "metadata.updated_at": bson_datetime(Utc::now()),
                        "metadata.last_event_id": event.event_id.to_string(),
                    },
                },
            ))
            .await
            .map_err(HandlerError::Store)?;

        if first_join.matched_count == 1 {
            log_event(self.handler_name(), event, "participant_joined_success");
            return Ok(());
        }

        // Either already joined (replay) or the activity doesn't exist.
        // A second, unguarded update tells them apart.
        let refreshed = self
            .store
            .guarded(collection.update_one(
                doc! { "_id": &activity_id },
                doc! {
                    "$addToSet": { "allowed_users": &user_id },
                    "$set": {
                        "metadata.updated_at": bson_datetime(Utc::now()),
                        "metadata.last_event_id": event.event_id.to_string(),
                    },
                },
            ))
            .await
            .map_err(HandlerError::Store)?;

        if refreshed.matched_count == 0 {
            return Err(HandlerError::NotFound(format!(
                "activity {activity_id} not found"
            )));
        }

        log_event(self.handler_name(), event, "participant_already_joined");
        Ok(())
    }
}
