//! Handler registry (C5).
//!
//! Maps `event_type → ordered list of handlers`, established once at
//! startup and then frozen for the process lifetime (spec.md §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use crate::handlers::ProjectionHandler;

pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn ProjectionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Append `handler` to the list for its `event_type`. Dispatch order
    /// follows registration order.
    pub fn register(&mut self, handler: Arc<dyn ProjectionHandler>) {
        let event_type = handler.event_type().to_string();
        tracing::debug!(
            event = "handler_registered",
            event_type = %event_type,
            handler = handler.handler_name(),
        );
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Handlers registered for `event_type`, in registration order.
    /// An empty slice is not an error — the dispatcher logs and skips.
    pub fn get_handlers(&self, event_type: &str) -> &[Arc<dyn ProjectionHandler>] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_handlers(&self, event_type: &str) -> bool {
        self.handlers
            .get(event_type)
            .is_some_and(|h| !h.is_empty())
    }

    pub fn registered_event_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::model::OutboxEvent;
    use async_trait::async_trait;

    struct StubHandler {
        event_type: &'static str,
        name: &'static str,
    }

    #[async_trait]
    impl ProjectionHandler for StubHandler {
        fn event_type(&self) -> &str {
            self.event_type
        }

        fn handler_name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn dispatch_order_follows_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(StubHandler {
            event_type: "UserCreated",
            name: "first",
        }));
        registry.register(Arc::new(StubHandler {
            event_type: "UserCreated",
            name: "second",
        }));

        let handlers = registry.get_handlers("UserCreated");
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].handler_name(), "first");
        assert_eq!(handlers[1].handler_name(), "second");
    }

    #[test]
    fn unknown_event_type_has_no_handlers() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has_handlers("Unknown"));
        assert!(registry.get_handlers("Unknown").is_empty());
    }
}
