//! Default handler for unmatched or unregistered routes.

use async_trait::async_trait;

use parley_core::types::ConversationTurn;

use crate::error::ChatError;
use crate::handler::RouteHandler;
use crate::types::HandlerReply;

/// Returns a fixed message. Never fails.
#[derive(Debug, Clone)]
pub struct FallbackHandler {
    message: String,
}

impl FallbackHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
impl RouteHandler for FallbackHandler {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn answer(
        &self,
        _message: &str,
        _history: &[ConversationTurn],
    ) -> Result<HandlerReply, ChatError> {
        Ok(HandlerReply::text(self.message.clone()))
    }
}
