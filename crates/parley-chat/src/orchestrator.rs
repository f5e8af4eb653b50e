//! Conversation orchestrator: validates a message, classifies it, dispatches
//! it to the route's handler with recent history, and records the turns.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use parley_core::config::ChatConfig;
use parley_core::types::{ConversationTurn, Role};

use crate::error::ChatError;
use crate::handler::{FallbackHandler, HandlerRegistry, RouteHandler};
use crate::history::SessionHistoryStore;
use crate::router::{pick_route, IntentRouter};
use crate::types::{ChatReply, ClassificationResult, RouteScore};

/// Behavior knobs for [`ConversationOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub history_window: usize,
    pub max_message_chars: usize,
    pub timeout: Duration,
    pub apology_message: String,
    pub fallback_message: String,
    pub degrade_on_classification_error: bool,
}

impl From<&ChatConfig> for OrchestratorSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            history_window: config.history_window,
            max_message_chars: config.max_message_chars,
            timeout: Duration::from_secs(config.request_timeout_secs),
            apology_message: config.apology_message.clone(),
            fallback_message: config.fallback_message.clone(),
            degrade_on_classification_error: config.degrade_on_classification_error,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

/// Binds the router, the handler registry, and the history store.
///
/// The orchestrator holds no conversation state of its own. Calls for the
/// same session are serialized for their whole duration so a user turn and
/// its answer are always stored next to each other.
pub struct ConversationOrchestrator {
    router: Arc<IntentRouter>,
    store: Arc<SessionHistoryStore>,
    handlers: HandlerRegistry,
    fallback: Arc<dyn RouteHandler>,
    settings: OrchestratorSettings,
}

impl ConversationOrchestrator {
    pub fn new(
        router: Arc<IntentRouter>,
        store: Arc<SessionHistoryStore>,
        handlers: HandlerRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        let fallback = Arc::new(FallbackHandler::new(settings.fallback_message.clone()));
        Self {
            router,
            store,
            handlers,
            fallback,
            settings,
        }
    }

    /// Replace the default handler used for unmatched or unregistered routes.
    pub fn with_fallback(mut self, fallback: Arc<dyn RouteHandler>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<SessionHistoryStore> {
        &self.store
    }

    /// Handle one message using the configured timeout.
    pub async fn handle(&self, session_id: &str, message: &str) -> Result<ChatReply, ChatError> {
        self.handle_with_timeout(session_id, message, self.settings.timeout)
            .await
    }

    /// Handle one message, bounding the whole interaction by `limit`.
    ///
    /// Handler failures and timeouts of either step are answered with the
    /// apology message; only the user turn is recorded in that case.
    /// Classification errors propagate unless degrading is configured.
    pub async fn handle_with_timeout(
        &self,
        session_id: &str,
        message: &str,
        limit: Duration,
    ) -> Result<ChatReply, ChatError> {
        self.validate(message)?;
        let deadline = Instant::now() + limit;

        let _guard = self.store.lock_session(session_id).await;

        let classification = match timeout_at(deadline, self.router.classify(message)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => self.on_classification_error(session_id, err)?,
            Err(_) => {
                let err = ChatError::Classification(format!("timed out after {:?}", limit));
                let unmatched = ClassificationResult::unmatched(0.0);
                return Ok(self.apologize(session_id, message, &unmatched, err));
            }
        };
        let route = classification.label().to_string();

        let handler = match classification.route.as_deref() {
            Some(name) => self.handlers.get(name).unwrap_or_else(|| {
                debug!(session_id, route = name, "No handler registered; using fallback");
                Arc::clone(&self.fallback)
            }),
            None => Arc::clone(&self.fallback),
        };

        let history = self.store.recent(session_id, self.settings.history_window);
        let outcome = match timeout_at(deadline, handler.answer(message, &history)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Handler(format!(
                "{} timed out after {:?}",
                handler.name(),
                limit
            ))),
        };

        match outcome {
            Ok(reply) => {
                self.store.append(session_id, Role::User, message, None);
                let sources = (!reply.sources.is_empty()).then(|| reply.sources.clone());
                self.store
                    .append(session_id, Role::Assistant, reply.answer.clone(), sources);
                debug!(session_id, route = %route, score = classification.score, "Message answered");
                Ok(ChatReply {
                    answer: reply.answer,
                    sources: reply.sources,
                    route,
                    score: classification.score,
                })
            }
            Err(err) => Ok(self.apologize(session_id, message, &classification, err)),
        }
    }

    /// Record the user turn alone and answer with the apology message.
    fn apologize(
        &self,
        session_id: &str,
        message: &str,
        classification: &ClassificationResult,
        err: ChatError,
    ) -> ChatReply {
        warn!(
            session_id,
            route = classification.label(),
            kind = %err.kind(),
            error = %err,
            "Interaction failed; replying with apology"
        );
        self.store.append(session_id, Role::User, message, None);
        ChatReply {
            answer: self.settings.apology_message.clone(),
            sources: Vec::new(),
            route: classification.label().to_string(),
            score: classification.score,
        }
    }

    fn validate(&self, message: &str) -> Result<(), ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > self.settings.max_message_chars {
            return Err(ChatError::MessageTooLong(self.settings.max_message_chars));
        }
        Ok(())
    }

    fn on_classification_error(
        &self,
        session_id: &str,
        err: ChatError,
    ) -> Result<ClassificationResult, ChatError> {
        if self.settings.degrade_on_classification_error {
            warn!(
                session_id,
                route = "unmatched",
                kind = %err.kind(),
                error = %err,
                "Classification failed; degrading to fallback"
            );
            return Ok(ClassificationResult::unmatched(0.0));
        }
        warn!(
            session_id,
            route = "unmatched",
            kind = %err.kind(),
            error = %err,
            "Classification failed"
        );
        Err(err)
    }

    /// Stored turns for a session, oldest first. `None` returns them all.
    pub fn history(&self, session_id: &str, limit: Option<usize>) -> Vec<ConversationTurn> {
        self.store.recent(session_id, limit.unwrap_or(usize::MAX))
    }

    pub fn clear_session(&self, session_id: &str) {
        self.store.clear(session_id);
    }

    pub fn route_names(&self) -> Vec<String> {
        self.router.route_names()
    }

    /// Classify a message and return the per-route scores behind the decision.
    ///
    /// The message is embedded once; the route is picked from those scores.
    pub async fn explain(
        &self,
        message: &str,
    ) -> Result<(ClassificationResult, Vec<RouteScore>), ChatError> {
        self.validate(message)?;
        let scores = self.router.scores(message).await?;
        Ok((pick_route(&scores), scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::config::{default_routes, ScoreAggregation};
    use parley_core::error::ParleyError;
    use parley_vector::embedding::{DynEmbeddingService, EmbeddingService, LexicalEmbedding};
    use parley_vector::faq::FaqKnowledgeBase;

    use crate::handler::testing::ScriptedModel;
    use crate::handler::FaqHandler;
    use crate::types::HandlerReply;

    const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

    struct FailingHandler;

    #[async_trait]
    impl RouteHandler for FailingHandler {
        fn name(&self) -> &str {
            "failing"
        }

        async fn answer(&self, _: &str, _: &[ConversationTurn]) -> Result<HandlerReply, ChatError> {
            Err(ChatError::Handler("upstream LLM returned 500".to_string()))
        }
    }

    struct SlowHandler(Duration);

    #[async_trait]
    impl RouteHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        async fn answer(&self, _: &str, _: &[ConversationTurn]) -> Result<HandlerReply, ChatError> {
            tokio::time::sleep(self.0).await;
            Ok(HandlerReply::text("too late"))
        }
    }

    /// Echoes the message and how much history it saw.
    struct EchoHandler;

    #[async_trait]
    impl RouteHandler for EchoHandler {
        fn name(&self) -> &str {
            "echo"
        }

        async fn answer(
            &self,
            message: &str,
            history: &[ConversationTurn],
        ) -> Result<HandlerReply, ChatError> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(HandlerReply::text(format!("re: {} ({})", message, history.len()))
                .with_sources(vec!["echo.txt".to_string()]))
        }
    }

    fn embedder() -> Arc<dyn DynEmbeddingService> {
        let routes = default_routes();
        Arc::new(LexicalEmbedding::fit(
            routes.iter().flat_map(|r| r.utterances.iter()),
        ))
    }

    async fn router() -> Arc<IntentRouter> {
        Arc::new(
            IntentRouter::build(&default_routes(), embedder(), ScoreAggregation::Max)
                .await
                .unwrap(),
        )
    }

    fn scripted_registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .with("faq", Arc::new(FallbackHandler::new("faq answer")))
            .with("sql", Arc::new(FallbackHandler::new("sql answer")))
            .with("small_talk", Arc::new(FallbackHandler::new("small talk answer")))
    }

    async fn orchestrator(handlers: HandlerRegistry) -> ConversationOrchestrator {
        ConversationOrchestrator::new(
            router().await,
            Arc::new(SessionHistoryStore::default()),
            handlers,
            OrchestratorSettings::default(),
        )
    }

    fn roles_and_contents(turns: &[ConversationTurn]) -> Vec<(Role, &str)> {
        turns.iter().map(|t| (t.role, t.content.as_str())).collect()
    }

    #[tokio::test]
    async fn test_hello_is_answered_by_small_talk() {
        let orch = orchestrator(scripted_registry()).await;
        let reply = orch.handle("s1", "Hello").await.unwrap();
        assert_eq!(reply.route, "small_talk");
        assert_eq!(reply.answer, "small talk answer");
    }

    #[tokio::test]
    async fn test_product_question_is_answered_by_sql() {
        let orch = orchestrator(scripted_registry()).await;
        let reply = orch
            .handle("s1", "Are there any Puma shoes on sale?")
            .await
            .unwrap();
        assert_eq!(reply.route, "sql");
        assert_eq!(reply.answer, "sql answer");
    }

    #[tokio::test]
    async fn test_gibberish_gets_fallback_message() {
        let orch = orchestrator(scripted_registry()).await;
        let reply = orch.handle("s1", "asdkjfh qwer").await.unwrap();
        assert_eq!(reply.route, "unmatched");
        assert_eq!(reply.answer, OrchestratorSettings::default().fallback_message);
        assert!(reply.sources.is_empty());
        assert_eq!(orch.history("s1", None).len(), 2);
    }

    #[tokio::test]
    async fn test_two_exchanges_record_four_turns_in_order() {
        let orch = orchestrator(scripted_registry()).await;
        orch.handle("s1", "Hi").await.unwrap();
        let reply = orch.handle("s1", "What's your return policy?").await.unwrap();
        assert_eq!(reply.route, "faq");

        let turns = orch.history("s1", None);
        assert_eq!(
            roles_and_contents(&turns),
            vec![
                (Role::User, "Hi"),
                (Role::Assistant, "small talk answer"),
                (Role::User, "What's your return policy?"),
                (Role::Assistant, "faq answer"),
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_failure_records_user_turn_only() {
        let handlers = scripted_registry().with("faq", Arc::new(FailingHandler));
        let orch = orchestrator(handlers).await;

        let reply = orch.handle("s2", "track my order").await.unwrap();
        assert_eq!(reply.answer, APOLOGY);
        assert_eq!(reply.route, "faq");

        let turns = orch.history("s2", None);
        assert_eq!(roles_and_contents(&turns), vec![(Role::User, "track my order")]);
    }

    #[tokio::test]
    async fn test_handler_timeout_records_user_turn_only() {
        let handlers = scripted_registry().with("faq", Arc::new(SlowHandler(Duration::from_secs(5))));
        let orch = orchestrator(handlers).await;

        let reply = orch
            .handle_with_timeout("s3", "track my order", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(reply.answer, APOLOGY);
        assert_eq!(orch.history("s3", None).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_and_oversized_messages_are_rejected() {
        let orch = orchestrator(scripted_registry()).await;
        assert!(matches!(orch.handle("s1", "").await, Err(ChatError::EmptyMessage)));
        assert!(matches!(orch.handle("s1", "  \n ").await, Err(ChatError::EmptyMessage)));

        let long = "a".repeat(2001);
        let err = orch.handle("s1", &long).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong(2000)));
        assert!(!orch.store().contains("s1"));
    }

    /// Embeds route utterances but fails on any other text.
    struct FlakyEmbedder(LexicalEmbedding, Vec<String>);

    impl EmbeddingService for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
            if self.1.iter().any(|u| u == text) {
                self.0.embed(text).await
            } else {
                Err(ParleyError::Embedding("model offline".to_string()))
            }
        }

        fn dimensions(&self) -> usize {
            EmbeddingService::dimensions(&self.0)
        }
    }

    async fn flaky_orchestrator(degrade: bool) -> ConversationOrchestrator {
        let routes = default_routes();
        let utterances: Vec<String> = routes.iter().flat_map(|r| r.utterances.clone()).collect();
        let embedder = FlakyEmbedder(LexicalEmbedding::fit(&utterances), utterances);
        let router = IntentRouter::build(&routes, Arc::new(embedder), ScoreAggregation::Max)
            .await
            .unwrap();
        let settings = OrchestratorSettings {
            degrade_on_classification_error: degrade,
            ..OrchestratorSettings::default()
        };
        ConversationOrchestrator::new(
            Arc::new(router),
            Arc::new(SessionHistoryStore::default()),
            scripted_registry(),
            settings,
        )
    }

    #[tokio::test]
    async fn test_classification_error_propagates_by_default() {
        let orch = flaky_orchestrator(false).await;
        let err = orch.handle("s1", "anything new").await.unwrap_err();
        assert!(matches!(err, ChatError::Classification(_)));
        assert!(orch.history("s1", None).is_empty());
    }

    #[tokio::test]
    async fn test_classification_error_degrades_when_configured() {
        let orch = flaky_orchestrator(true).await;
        let reply = orch.handle("s1", "anything new").await.unwrap();
        assert_eq!(reply.route, "unmatched");
        assert_eq!(reply.answer, orch.settings().fallback_message);
        assert_eq!(orch.history("s1", None).len(), 2);
    }

    /// Embeds route utterances at once but stalls on any other text.
    struct StallingEmbedder(LexicalEmbedding, Vec<String>, Duration);

    impl EmbeddingService for StallingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
            if !self.1.iter().any(|u| u == text) {
                tokio::time::sleep(self.2).await;
            }
            self.0.embed(text).await
        }

        fn dimensions(&self) -> usize {
            EmbeddingService::dimensions(&self.0)
        }
    }

    async fn stalling_orchestrator(stall: Duration, handlers: HandlerRegistry) -> ConversationOrchestrator {
        let routes = default_routes();
        let utterances: Vec<String> = routes.iter().flat_map(|r| r.utterances.clone()).collect();
        let embedder = StallingEmbedder(LexicalEmbedding::fit(&utterances), utterances, stall);
        let router = IntentRouter::build(&routes, Arc::new(embedder), ScoreAggregation::Max)
            .await
            .unwrap();
        ConversationOrchestrator::new(
            Arc::new(router),
            Arc::new(SessionHistoryStore::default()),
            handlers,
            OrchestratorSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_classification_timeout_records_user_turn_only() {
        let orch = stalling_orchestrator(Duration::from_secs(5), scripted_registry()).await;

        let reply = orch
            .handle_with_timeout("s9", "track my order", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(reply.answer, APOLOGY);
        assert_eq!(reply.route, "unmatched");
        assert_eq!(reply.score, 0.0);

        let turns = orch.history("s9", None);
        assert_eq!(roles_and_contents(&turns), vec![(Role::User, "track my order")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_whole_interaction() {
        // Each step fits the limit alone, together they exceed it.
        let handlers =
            scripted_registry().with("faq", Arc::new(SlowHandler(Duration::from_millis(150))));
        let orch = stalling_orchestrator(Duration::from_millis(150), handlers).await;

        let started = Instant::now();
        let reply = orch
            .handle_with_timeout("s1", "track my order", Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(reply.answer, APOLOGY);
        assert_eq!(reply.route, "faq");
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(orch.history("s1", None).len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_route_uses_fallback() {
        let handlers = HandlerRegistry::new().with("faq", Arc::new(FallbackHandler::new("faq answer")));
        let orch = orchestrator(handlers)
            .await
            .with_fallback(Arc::new(FallbackHandler::new("custom fallback")));
        let reply = orch.handle("s1", "Hello").await.unwrap();
        assert_eq!(reply.route, "small_talk");
        assert_eq!(reply.answer, "custom fallback");
    }

    #[tokio::test]
    async fn test_handler_sees_windowed_history_and_sources_are_stored() {
        let handlers = HandlerRegistry::new().with("small_talk", Arc::new(EchoHandler));
        let orch = orchestrator(handlers).await;
        for _ in 0..5 {
            orch.handle("s1", "Hello").await.unwrap();
        }
        // Ten turns stored, but the handler only ever sees the last six.
        let reply = orch.handle("s1", "Hello").await.unwrap();
        assert_eq!(reply.answer, "re: Hello (6)");
        assert_eq!(reply.sources, vec!["echo.txt".to_string()]);

        let last = orch.history("s1", Some(1));
        assert_eq!(last[0].sources.as_deref(), Some(&["echo.txt".to_string()][..]));
        assert_eq!(orch.history("s1", None).len(), 12);
    }

    #[tokio::test]
    async fn test_concurrent_same_session_calls_never_interleave() {
        let handlers = HandlerRegistry::new().with("small_talk", Arc::new(EchoHandler));
        let orch = Arc::new(orchestrator(handlers).await);

        let mut tasks = Vec::new();
        for i in 0..10 {
            let orch = Arc::clone(&orch);
            tasks.push(tokio::spawn(async move {
                let message = format!("Hello {}", i);
                orch.handle("shared", &message).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let turns = orch.history("shared", None);
        assert_eq!(turns.len(), 20);
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert!(pair[1].content.starts_with(&format!("re: {} (", pair[0].content)));
        }
    }

    #[tokio::test]
    async fn test_clear_session_and_helpers() {
        let orch = orchestrator(scripted_registry()).await;
        orch.handle("s1", "Hello").await.unwrap();
        orch.clear_session("s1");
        orch.clear_session("s1");
        assert!(orch.history("s1", None).is_empty());
        assert_eq!(orch.route_names(), vec!["faq", "sql", "small_talk"]);
        let (result, scores) = orch.explain("Hello").await.unwrap();
        assert_eq!(result.label(), "small_talk");
        assert_eq!(scores.len(), 3);
        assert!(orch.explain("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_with_faq_handler() {
        let kb = FaqKnowledgeBase::new(embedder());
        kb.ingest(vec![parley_vector::faq::FaqEntry {
            question: "How can I track my order?".to_string(),
            answer: "Use the tracking link in your email.".to_string(),
        }])
        .await
        .unwrap();
        let model = Arc::new(ScriptedModel::new(["Use the tracking link in your email."]));
        let handlers = scripted_registry().with(
            "faq",
            Arc::new(FaqHandler::new(kb, model, Default::default())),
        );
        let orch = orchestrator(handlers).await;

        let reply = orch.handle("s1", "track my order").await.unwrap();
        assert_eq!(reply.route, "faq");
        assert_eq!(reply.answer, "Use the tracking link in your email.");
    }
}
