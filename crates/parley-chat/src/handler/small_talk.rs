//! Conversational replies in the ShopBot persona.

use std::sync::Arc;

use async_trait::async_trait;

use parley_core::types::ConversationTurn;

use crate::error::ChatError;
use crate::handler::RouteHandler;
use crate::llm::{prompt_with_history, ChatModel, CompletionOptions};
use crate::types::HandlerReply;

const PERSONA_PROMPT: &str = "You are ShopBot, a friendly assistant for an online shoe and \
apparel store. You help customers find products and answer questions about orders and store \
policies.

Read the whole conversation before answering.
- Greetings, thanks, or questions about yourself: reply warmly in one or two sentences, then \
offer to help with their shopping.
- Shopping questions: use earlier turns to resolve references such as \"that one\" and answer \
concisely.
- Do not drift into long off-topic conversations.

Stay positive and professional.";

/// Free-form chat backed by a language model.
pub struct SmallTalkHandler {
    model: Arc<dyn ChatModel>,
    temperature: f32,
}

impl SmallTalkHandler {
    pub fn new(model: Arc<dyn ChatModel>, temperature: f32) -> Self {
        Self { model, temperature }
    }
}

#[async_trait]
impl RouteHandler for SmallTalkHandler {
    fn name(&self) -> &str {
        "small_talk"
    }

    async fn answer(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<HandlerReply, ChatError> {
        let messages = prompt_with_history(PERSONA_PROMPT, history, message);
        let answer = self
            .model
            .complete(&messages, CompletionOptions::new(self.temperature))
            .await?;
        Ok(HandlerReply::text(answer.trim()))
    }
}
