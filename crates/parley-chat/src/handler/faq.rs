//! Answers store-policy questions from the FAQ knowledge base.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use parley_core::types::ConversationTurn;
use parley_vector::faq::FaqKnowledgeBase;

use crate::error::ChatError;
use crate::handler::RouteHandler;
use crate::llm::{prompt_with_history, ChatModel, CompletionOptions};
use crate::types::HandlerReply;

/// Settings for [`FaqHandler`].
#[derive(Debug, Clone, Copy)]
pub struct FaqSettings {
    /// FAQ entries fetched as context.
    pub top_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for FaqSettings {
    fn default() -> Self {
        Self {
            top_k: 2,
            temperature: 0.1,
            max_tokens: 500,
        }
    }
}

/// Retrieval-grounded FAQ answers.
///
/// The closest stored questions are looked up, their answers become the
/// context of the system prompt, and the model answers with the session's
/// history in view.
pub struct FaqHandler {
    knowledge: FaqKnowledgeBase,
    model: Arc<dyn ChatModel>,
    settings: FaqSettings,
}

impl FaqHandler {
    pub fn new(knowledge: FaqKnowledgeBase, model: Arc<dyn ChatModel>, settings: FaqSettings) -> Self {
        Self {
            knowledge,
            model,
            settings,
        }
    }
}

fn system_prompt(context: &str) -> String {
    format!(
        "You are a helpful FAQ assistant for an online store. Answer using only the context \
below. If the context does not contain the answer, say \"I don't know\" and do not invent \
details. Keep the conversation flowing and take earlier turns into account.\n\nCONTEXT: {}",
        context
    )
}

#[async_trait]
impl RouteHandler for FaqHandler {
    fn name(&self) -> &str {
        "faq"
    }

    async fn answer(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<HandlerReply, ChatError> {
        let context = self
            .knowledge
            .context_for(message, self.settings.top_k)
            .await
            .map_err(|e| ChatError::Handler(format!("FAQ lookup failed: {}", e)))?;
        debug!(context_chars = context.len(), "FAQ context retrieved");

        let messages = prompt_with_history(system_prompt(&context), history, message);
        let options = CompletionOptions::new(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);
        let answer = self.model.complete(&messages, options).await?;
        Ok(HandlerReply::text(answer.trim()))
    }
}
