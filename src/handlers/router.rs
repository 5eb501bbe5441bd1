use super::traits::EventHandler;
use log::trace;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Central router for dispatching socket events to their handlers.
///
/// The router maintains a registry of handlers keyed by event name and
/// dispatches each incoming event to the handler that claimed it.
pub struct EventRouter {
    /// Map of event name -> handler for fast lookups
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

impl EventRouter {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for every event name it declares.
    ///
    /// # Panics
    /// Panics if another handler already claimed one of the names, to prevent
    /// accidental overwrites during initialization.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        for &event in handler.events() {
            if self.handlers.insert(event, handler.clone()).is_some() {
                panic!("Handler for event '{}' already registered", event);
            }
        }
    }

    /// Dispatch an event to its handler.
    ///
    /// # Returns
    /// Returns `true` if a handler was found and processed the event, `false`
    /// if no handler was registered for the name or the handler dropped it.
    pub async fn dispatch(&self, event: &str, data: Value) -> bool {
        match self.handlers.get(event) {
            Some(handler) => handler.handle(event, data).await,
            None => {
                trace!(target: "Socket", "No handler for event '{event}'");
                false
            }
        }
    }

    /// Get the number of registered event names (useful for testing).
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MockHandler {
        events: &'static [&'static str],
        seen: Mutex<Vec<(String, Value)>>,
    }

    impl MockHandler {
        fn new(events: &'static [&'static str]) -> Self {
            Self {
                events,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<(String, Value)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl EventHandler for MockHandler {
        fn events(&self) -> &'static [&'static str] {
            self.events
        }

        async fn handle(&self, event: &str, data: Value) -> bool {
            self.seen.lock().unwrap().push((event.to_string(), data));
            true
        }
    }

    #[test]
    fn test_router_registration() {
        let mut router = EventRouter::new();
        router.register(Arc::new(MockHandler::new(&["call_request", "call_ended"])));
        assert_eq!(router.handler_count(), 2);
    }

    #[test]
    #[should_panic(expected = "Handler for event 'call_ended' already registered")]
    fn test_router_double_registration_panics() {
        let mut router = EventRouter::new();
        router.register(Arc::new(MockHandler::new(&["call_ended"])));
        router.register(Arc::new(MockHandler::new(&["call_ended"]))); // Should panic
    }

    #[tokio::test]
    async fn test_router_dispatch_found() {
        let mut router = EventRouter::new();
        let handler = Arc::new(MockHandler::new(&["call_request"]));
        router.register(handler.clone());

        assert!(router.dispatch("call_request", json!({"call_id": "c1"})).await);
        assert_eq!(
            handler.seen(),
            vec![("call_request".to_string(), json!({"call_id": "c1"}))]
        );
    }

    #[tokio::test]
    async fn test_router_dispatch_not_found() {
        let mut router = EventRouter::new();
        let handler = Arc::new(MockHandler::new(&["call_request"]));
        router.register(handler.clone());

        assert!(!router.dispatch("new_message", json!({"text": "hi"})).await);
        assert!(handler.seen().is_empty());
    }
}
