use std::collections::HashMap;
use std::sync::Arc;

use omnilog_api::EventHandler;

use crate::error::EngineError;

/// Event type → handler table, built once at startup.
///
/// Read-only after construction: lookups need no locking. Any event type
/// without a registered handler resolves to the default handler.
pub struct RoutingTable {
    routes: HashMap<String, Arc<dyn EventHandler>>,
    default: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("routes", &self.event_types())
            .field("default", &self.default.name())
            .finish()
    }
}

impl RoutingTable {
    pub fn builder(default: Arc<dyn EventHandler>) -> RoutingTableBuilder {
        RoutingTableBuilder {
            routes: Vec::new(),
            default,
        }
    }

    /// Handler for `event_type`, falling back to the default handler.
    pub fn resolve(&self, event_type: &str) -> &dyn EventHandler {
        match self.routes.get(event_type) {
            Some(handler) => handler.as_ref(),
            None => self.default.as_ref(),
        }
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Collects `{event type → handler}` pairs; validated in [`build`](Self::build).
pub struct RoutingTableBuilder {
    routes: Vec<(String, Arc<dyn EventHandler>)>,
    default: Arc<dyn EventHandler>,
}

impl RoutingTableBuilder {
    pub fn route(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.push((event_type.into(), handler));
        self
    }

    pub fn build(self) -> Result<RoutingTable, EngineError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for (event_type, handler) in self.routes {
            if event_type.is_empty() {
                return Err(EngineError::Config(format!(
                    "handler '{}' registered for an empty event type",
                    handler.name()
                )));
            }
            if routes.contains_key(&event_type) {
                return Err(EngineError::Config(format!(
                    "event type '{event_type}' registered more than once"
                )));
            }
            tracing::debug!(event_type = %event_type, handler = handler.name(), "registered route");
            routes.insert(event_type, handler);
        }
        Ok(RoutingTable {
            routes,
            default: self.default,
        })
    }
}
