//! Route handler trait and registry.
//!
//! Each intent route is answered by one `RouteHandler`. The orchestrator
//! looks handlers up by route name; anything without a registered handler
//! goes to the fallback.

pub mod faq;
pub mod fallback;
pub mod product;
pub mod small_talk;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use parley_core::types::ConversationTurn;

use crate::error::ChatError;
use crate::types::HandlerReply;

pub use faq::{FaqHandler, FaqSettings};
pub use fallback::FallbackHandler;
pub use product::ProductSearchHandler;
pub use small_talk::SmallTalkHandler;

/// Produces an answer for one routed message.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Answer `message` given the session's recent turns, oldest first.
    async fn answer(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<HandlerReply, ChatError>;
}

/// Map of route name to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RouteHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a route, replacing any previous one.
    pub fn register(&mut self, route: impl Into<String>, handler: Arc<dyn RouteHandler>) {
        self.handlers.insert(route.into(), handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, route: impl Into<String>, handler: Arc<dyn RouteHandler>) -> Self {
        self.register(route, handler);
        self
    }

    pub fn get(&self, route: &str) -> Option<Arc<dyn RouteHandler>> {
        self.handlers.get(route).cloned()
    }

    pub fn contains(&self, route: &str) -> bool {
        self.handlers.contains_key(route)
    }

    /// Registered route names, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.handlers.keys().cloned().collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("routes", &self.routes())
            .finish()
    }
}
