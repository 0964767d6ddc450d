use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{doc, Document};

use crate::error::{HandlerError, StoreError};
use crate::model::OutboxEvent;
use crate::store::{is_duplicate_key_error, ProjectionStore};

use super::{bson_datetime, log_event, ProjectionHandler};

/// `UserCreated` → primary projection (spec.md §4.4).
pub struct UserCreatedHandler {
    store: Arc<ProjectionStore>,
}

impl UserCreatedHandler {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionHandler for UserCreatedHandler {
    fn event_type(&self) -> &str {
        "UserCreated"
    }

    fn handler_name(&self) -> &str {
        "UserCreatedHandler"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        log_event(self.handler_name(), event, "processing_user_created");

        let user_id = event.aggregate_id.to_string();
        let first_name = event.payload_str("first_name").unwrap_or("");
        let last_name = event.payload_str("last_name").unwrap_or("");
        let name = format!("{first_name} {last_name}").trim().to_string();

        let doc = doc! {
            "_id": &user_id,
            "email": event.payload_str("email"),
            "username": event.payload_str("username"),
            "name": &name,
            "first_name": event.payload_str("first_name"),
            "last_name": event.payload_str("last_name"),
            "profile": {
                "bio": event.payload_str("bio"),
                "avatar_url": event.payload_str("avatar_url"),
            },
            "metadata": {
                "created_at": bson_datetime(event.created_at),
                "updated_at": bson_datetime(Utc::now()),
                "source_event_id": event.event_id.to_string(),
            },
            "allowed_users": [&user_id],
        };

        let collection = self.store.collection("users");
        match self.store.guarded(collection.insert_one(doc)).await {
            Ok(_) => {}
            Err(StoreError::Operation(inner)) if is_duplicate_key_error(&inner) => {
                log_event(self.handler_name(), event, "user_created_duplicate_ignored");
            }
            Err(e) => return Err(HandlerError::Store(e)),
        }

        log_event(self.handler_name(), event, "user_created_success");
        Ok(())
    }
}

/// `UserCreated` → statistics side-effect (spec.md §4.4). Listens to the
/// same event type as [`UserCreatedHandler`] — multiple handlers per
/// event type is the registry's central feature (spec.md §4.5).
pub struct UserStatisticsHandler {
    store: Arc<ProjectionStore>,
}

impl UserStatisticsHandler {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionHandler for UserStatisticsHandler {
    fn event_type(&self) -> &str {
        "UserCreated"
    }

    fn handler_name(&self) -> &str {
        "UserStatisticsHandler"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        log_event(self.handler_name(), event, "updating_user_statistics");

        let collection = self.store.collection("statistics");
        self.store
            .guarded(
                collection
                    .update_one(
                        doc! { "_id": "global_stats" },
                        doc! {
                            "$inc": { "total_users": 1i32 },
                            "$set": { "last_updated": bson_datetime(Utc::now()) },
                        },
                    )
                    .upsert(true),
            )
            .await
            .map_err(HandlerError::Store)?;

        log_event(self.handler_name(), event, "user_statistics_updated");
        Ok(())
    }
}

/// `UserUpdated` (spec.md §4.4): partial update over the subset of
/// payload keys present, with `name` recomputed from first/last name.
pub struct UserUpdatedHandler {
    store: Arc<ProjectionStore>,
}

impl UserUpdatedHandler {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionHandler for UserUpdatedHandler {
    fn event_type(&self) -> &str {
        "UserUpdated"
    }

    fn handler_name(&self) -> &str {
        "UserUpdatedHandler"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        log_event(self.handler_name(), event, "processing_user_updated");

        let user_id = event.aggregate_id.to_string();
        let mut set_doc = Document::new();

        if let Some(email) = event.payload_str("email") {
            set_doc.insert("email", email);
        }
        if let Some(username) = event.payload_str("username") {
            set_doc.insert("username", username);
        }
        if event.payload_field("first_name").is_some() || event.payload_field("last_name").is_some() {
            let first_name = event.payload_str("first_name").unwrap_or("");
            let last_name = event.payload_str("last_name").unwrap_or("");
            set_doc.insert("name", format!("{first_name} {last_name}").trim().to_string());
            set_doc.insert("first_name", first_name);
            set_doc.insert("last_name", last_name);
        }
        if let Some(bio) = event.payload_str("bio") {
            set_doc.insert("profile.bio", bio);
        }
        if let Some(avatar_url) = event.payload_str("avatar_url") {
            set_doc.insert("profile.avatar_url", avatar_url);
        }

        set_doc.insert("metadata.updated_at", bson_datetime(Utc::now()));
        set_doc.insert("metadata.last_event_id", event.event_id.to_string());

        let collection = self.store.collection("users");
        let result = self
            .store
            .guarded(collection.update_one(doc! { "_id": &user_id }, doc! { "$set": set_doc }))
            .await
            .map_err(HandlerError::Store)?;

        if result.matched_count == 0 {
            return Err(HandlerError::NotFound(format!("user {user_id} not found")));
        }

        log_event(self.handler_name(), event, "user_updated_success");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn derives_name_from_first_and_last() {
        let first = "Ada";
        let last = "Lovelace";
        assert_eq!(format!("{first} {last}").trim(), "Ada Lovelace");
    }

    #[test]
    fn trims_name_when_only_first_present() {
        let first = "Ada";
        let last = "";
        assert_eq!(format!("{first} {last}").trim(), "Ada");
    }
}
