// Service Registry Module
//
// INTENTION:
// Map a request kind to an ordered list of pluggable handlers and resolve the
// one to invoke. The registry does not call handlers itself; dispatch is the
// executor's job.
//
// Resolution walks the kind's ancestry (an explicit child -> parent table
// populated at registration, replacing runtime type introspection) until a
// registered handler list is found, then picks the highest priority entry,
// ties broken by implementation name for determinism, and returns a fresh
// clone. Handlers are stateful per call; cloning is the isolation mechanism.

use std::collections::HashMap;
use tokio::sync::RwLock;

use hausnet_common::logging::{Component, Logger};

use crate::error::{Result, RpcError};
use crate::services::ServiceHandler;

pub struct ServiceRegistry {
    handlers: RwLock<HashMap<String, Vec<Box<dyn ServiceHandler>>>>,
    /// Child kind -> parent kind, the ancestry chain used as fallback.
    hierarchy: RwLock<HashMap<String, String>>,
    logger: Logger,
}

impl ServiceRegistry {
    pub fn new(logger: &Logger) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            hierarchy: RwLock::new(HashMap::new()),
            logger: logger.with_component(Component::Registry),
        }
    }

    /// Register a handler prototype under its declared request kind.
    pub async fn register(&self, handler: Box<dyn ServiceHandler>) {
        self.logger.debug(format!(
            "registering handler '{}' for kind '{}'",
            handler.handler_name(),
            handler.request_kind()
        ));
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(handler.request_kind().to_string())
            .or_default()
            .push(handler);
    }

    /// Declare that `kind` falls back to `parent` when it has no handlers of
    /// its own.
    pub async fn register_parent(&self, kind: impl Into<String>, parent: impl Into<String>) {
        let mut hierarchy = self.hierarchy.write().await;
        hierarchy.insert(kind.into(), parent.into());
    }

    /// Resolve the handler for a request kind: exact kind first, then up the
    /// ancestry chain. Returns a fresh clone of the winning prototype.
    pub async fn resolve(&self, kind: &str) -> Result<Box<dyn ServiceHandler>> {
        let handlers = self.handlers.read().await;
        let hierarchy = self.hierarchy.read().await;

        let mut current = kind.to_string();
        loop {
            if let Some(candidates) = handlers.get(&current) {
                if let Some(winner) = pick(candidates) {
                    self.logger.debug(format!(
                        "resolved kind '{kind}' to handler '{}' via '{current}'",
                        winner.handler_name()
                    ));
                    return Ok(winner);
                }
            }
            match hierarchy.get(&current) {
                Some(parent) => current = parent.clone(),
                None => return Err(RpcError::ServiceNotFound(kind.to_string())),
            }
        }
    }

    /// A clone of every registered handler.
    pub async fn list(&self) -> Vec<Box<dyn ServiceHandler>> {
        let handlers = self.handlers.read().await;
        handlers
            .values()
            .flat_map(|candidates| candidates.iter().map(|h| h.clone_handler()))
            .collect()
    }

    /// Swap the whole table; used when the external plugin discovery signals
    /// a change.
    pub async fn replace_all(
        &self,
        new_handlers: Vec<Box<dyn ServiceHandler>>,
        new_hierarchy: HashMap<String, String>,
    ) {
        self.logger.info(format!(
            "reloading registry with {} handler(s)",
            new_handlers.len()
        ));
        let mut table: HashMap<String, Vec<Box<dyn ServiceHandler>>> = HashMap::new();
        for handler in new_handlers {
            table
                .entry(handler.request_kind().to_string())
                .or_default()
                .push(handler);
        }
        *self.handlers.write().await = table;
        *self.hierarchy.write().await = new_hierarchy;
    }
}

/// Highest priority wins; ties broken by implementation name.
fn pick(candidates: &[Box<dyn ServiceHandler>]) -> Option<Box<dyn ServiceHandler>> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| b.handler_name().cmp(a.handler_name()))
        })
        .map(|winner| winner.clone_handler())
}
